// tests/error_tests.rs

mod test_utils;
use test_utils::*;

use linaro::RuntimeErrorKind;

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_undefined_identifier_is_reported_with_location() {
        assert_eq!(compile_errors("print nope"), vec!["test.lin:1:7: [Semantic Error] Identifier not defined 'nope'"]);
    }

    #[test]
    fn test_duplicate_parameter() {
        assert_eq!(
            compile_errors("fn f(a, a) { }"),
            vec!["test.lin:1:9: [Semantic Error] Identifier already taken: 'a'"]
        );
    }

    #[test]
    fn test_semantic_errors_accumulate() {
        let errors = compile_errors("print a\nprint b\n1 = 2");
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("test.lin:1:7:"));
        assert!(errors[1].starts_with("test.lin:2:7:"));
        assert!(errors[2].ends_with("Left hand side of assignment invalid"));
    }

    #[test]
    fn test_syntax_error_category() {
        let errors = compile_errors("print )");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("test.lin:1:7: [Syntax Error] Expected expression"));
    }

    #[test]
    fn test_lexical_error_category() {
        let errors = compile_errors("x = 1 @ 2");
        assert!(errors[0].starts_with("test.lin:1:7: [Lexical Error]"));
    }

    #[test]
    fn test_classes_are_rejected() {
        let errors = compile_errors("class A { }\nprint 1");
        assert_eq!(errors, vec!["test.lin:1:1: [Syntax Error] classes are not supported"]);
    }

    #[test]
    fn test_calling_a_number() {
        let (err, output) = run_err("x = 5\nx()");
        assert_eq!(err.kind, RuntimeErrorKind::NotCallable);
        assert_eq!(err.to_string(), "test.lin:2:2: [Runtime Error] Attempted invoking non-callable object.");
        assert_eq!(output, "");
    }

    #[test]
    fn test_indexing_a_non_array() {
        let (err, _) = run_err("s = \"abc\"\nprint s[0]");
        assert_eq!(err.kind, RuntimeErrorKind::NotAnArray);
        assert_eq!(err.to_string(), "test.lin:2:8: [Runtime Error] Attempted array access [expr] was not an array.");

        let (err, _) = run_err("n = 1\nn[0] = 2");
        assert_eq!(err.kind, RuntimeErrorKind::NotAnArray);
    }

    #[test]
    fn test_output_before_error_is_kept() {
        let (err, output) = run_err("print 1\nprint 2\nnull()\nprint 3");
        assert_eq!(err.kind, RuntimeErrorKind::NotCallable);
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_error_inside_function_reports_callee_location() {
        let (err, _) = run_err("fn f() {\n  ret 1()\n}\nf()");
        assert!(err.to_string().starts_with("test.lin:2:8:"), "{}", err);
    }
}
