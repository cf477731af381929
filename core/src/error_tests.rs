#[cfg(test)]
mod tests {
    use crate::error::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::BackendError("connection refused".to_string());
        assert_eq!(err.to_string(), "Backend error: connection refused");

        let err = CoreError::UnknownProcess("ghost".to_string());
        assert_eq!(err.to_string(), "Unknown process: ghost");

        let err = CoreError::ProcessSpawn("no such file".to_string());
        assert_eq!(err.to_string(), "Process spawn error: no such file");

        let err = CoreError::ValidationError("name: cannot be empty".to_string());
        assert_eq!(err.to_string(), "Validation error: name: cannot be empty");

        let err = CoreError::Other("generic error".to_string());
        assert_eq!(err.to_string(), "Generic error: generic error");
    }

    #[test]
    fn test_core_error_from_std_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();

        if let CoreError::IoError(_) = core_err {
            // Expected variant
        } else {
            panic!("Expected CoreError::IoError variant");
        }
    }

    #[test]
    fn test_core_error_from_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let core_err: CoreError = serde_err.into();

        if let CoreError::SerializationError(_) = core_err {
            // Expected variant
        } else {
            panic!("Expected CoreError::SerializationError variant");
        }
    }

    #[test]
    fn test_from_string_conversions() {
        let error: CoreError = "test error".into();
        assert_eq!(error.to_string(), "Generic error: test error");

        let error: CoreError = "test error".to_string().into();
        assert_eq!(error.to_string(), "Generic error: test error");
    }

    #[test]
    fn test_error_trait_implementation() {
        let err = CoreError::StateError("test".to_string());

        let _: &dyn Error = &err;
        assert!(err.source().is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::ConfigurationError("t".to_string()).code(), "CORE001");
        assert_eq!(CoreError::ValidationError("t".to_string()).code(), "CORE002");
        assert_eq!(CoreError::InitializationError("t".to_string()).code(), "CORE003");
        assert_eq!(CoreError::StateError("t".to_string()).code(), "CORE010");
        assert_eq!(CoreError::DuplicateName("t".to_string()).code(), "CORE011");
        assert_eq!(CoreError::BackendError("t".to_string()).code(), "CORE012");
        assert_eq!(CoreError::UnknownProcess("t".to_string()).code(), "CORE013");
        assert_eq!(CoreError::ProcessSpawn("t".to_string()).code(), "CORE020");
        assert_eq!(CoreError::ProcessSignal("t".to_string()).code(), "CORE021");
        assert_eq!(CoreError::ProcessWait("t".to_string()).code(), "CORE022");
        assert_eq!(CoreError::Other("t".to_string()).code(), "CORE999");
    }
}
