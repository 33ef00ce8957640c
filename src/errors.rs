error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    errors {
        Config(msg: String) {
            description("Configuration error")
            display("Configuration error: {}", msg)
        }

        Connection(msg: String) {
            description("Connection error")
            display("Connection error: {}", msg)
        }

        Decode(msg: String) {
            description("Decode error")
            display("Decode error: {}", msg)
        }

        Validation(msg: String) {
            description("Validation error")
            display("Validation error: {}", msg)
        }

        InsufficientInputs(target: i64, available: i64) {
            description("Input source exhausted")
            display(
                "Input source exhausted: needed {} satoshi, only {} available",
                target, available
            )
        }

        Interrupted {
            description("Interrupted by cancellation signal")
            display("Interrupted by cancellation signal")
        }
    }
}

pub fn config_error(what: &str) -> Error {
    ErrorKind::Config(what.to_string()).into()
}
