//! Tests for engine configuration.

#[cfg(test)]
mod engine_tests {
    use std::sync::{Arc, Mutex};

    use crate::engine::{
        init, EngineConfigState, EngineConfigSurface, EngineError, EngineInitializer, EngineSettings, LogCallback,
        ENGINE_MISUSE, ENGINE_OK,
    };

    fn capture() -> (LogCallback, Arc<Mutex<Vec<(i32, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: LogCallback = Arc::new(move |code, message: &str| sink.lock().unwrap().push((code, message.to_string())));
        (callback, lines)
    }

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert!(settings.multithread);
        assert!(!settings.memory_status);
        assert!(settings.log_callback.is_some());
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(EngineError::check(ENGINE_OK), Ok(()));
        assert_eq!(EngineError::check(ENGINE_MISUSE), Err(EngineError::ConfigurationTooLate));
        assert_eq!(EngineError::check(1), Err(EngineError::Rejected(1)));
    }

    #[test]
    fn test_initializer_configures_once() {
        let (callback, lines) = capture();
        let settings = EngineSettings {
            memory_status: true,
            log_callback: Some(callback),
            ..EngineSettings::default()
        };
        let initializer = EngineInitializer::new();
        let mut state = EngineConfigState::new();

        assert_eq!(initializer.init(&mut state, &settings), Ok(()));
        assert!(state.is_multithread());
        assert_eq!(state.memory_status(), Some(true));
        assert_eq!(state.calls(), 3);

        assert_eq!(initializer.init(&mut state, &EngineSettings::default()), Ok(()));
        assert_eq!(state.calls(), 3);
        assert_eq!(state.memory_status(), Some(true));

        assert!(state.log(17, "schema changed"));
        assert_eq!(*lines.lock().unwrap(), vec![(17, "schema changed".to_string())]);
    }

    #[test]
    fn test_configuration_after_first_use_is_refused() {
        let initializer = EngineInitializer::new();
        let mut state = EngineConfigState::new();
        state.seal();

        let outcome = initializer.init(&mut state, &EngineSettings::default());
        assert_eq!(outcome, Err(EngineError::ConfigurationTooLate));
        assert_eq!(state.calls(), 1);
        assert!(!state.is_multithread());

        // The failure is remembered rather than retried.
        let mut fresh = EngineConfigState::new();
        assert_eq!(
            initializer.init(&mut fresh, &EngineSettings::default()),
            Err(EngineError::ConfigurationTooLate)
        );
        assert_eq!(fresh.calls(), 0);
        assert_eq!(initializer.outcome(), Some(&Err(EngineError::ConfigurationTooLate)));
    }

    #[test]
    fn test_sealed_state_refuses_every_call() {
        let mut state = EngineConfigState::new();
        state.set_memory_status(false).unwrap();
        state.seal();
        assert_eq!(state.enable_multithread(), Err(EngineError::ConfigurationTooLate));
        assert_eq!(state.set_memory_status(true), Err(EngineError::ConfigurationTooLate));
        let (callback, _) = capture();
        assert_eq!(state.set_log_callback(callback), Err(EngineError::ConfigurationTooLate));
        assert_eq!(state.memory_status(), Some(false));
        assert!(!state.log(1, "dropped"));
    }

    #[test]
    fn test_repeated_calls_before_first_use_last_callback_wins() {
        let mut state = EngineConfigState::new();
        let (first, first_lines) = capture();
        let (second, second_lines) = capture();
        state.enable_multithread().unwrap();
        state.enable_multithread().unwrap();
        state.set_log_callback(first).unwrap();
        state.set_log_callback(second).unwrap();

        assert!(state.log(0, "hello"));
        assert!(first_lines.lock().unwrap().is_empty());
        assert_eq!(second_lines.lock().unwrap().len(), 1);
        assert!(state.is_multithread());
    }

    #[test]
    fn test_single_threaded_settings_skip_multithread() {
        let settings = EngineSettings {
            multithread: false,
            log_callback: None,
            ..EngineSettings::default()
        };
        let mut state = EngineConfigState::new();
        EngineInitializer::new().init(&mut state, &settings).unwrap();
        assert!(!state.is_multithread());
        assert_eq!(state.calls(), 1);
    }

    #[test]
    fn test_process_wide_init_runs_once() {
        let mut first = EngineConfigState::new();
        let mut second = EngineConfigState::new();
        let a = init(&mut first, &EngineSettings::default());
        let b = init(&mut second, &EngineSettings::default());
        assert_eq!(a, b);
        assert_eq!(first.calls() + second.calls(), 3);
    }
}
