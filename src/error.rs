use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type covering every failure this library can return.
///
/// The engine distinguishes two severities. Failures inside a single rewrite
/// pass (malformed bodies, metadata-store rejections, unresolvable tokens) are
/// recoverable: the pass is abandoned and the host keeps the original method
/// body. Failures at initialization ([`Error::Incapable`],
/// [`Error::AlreadyInitialized`]) are fatal for the engine instance.
#[derive(Error, Debug)]
pub enum Error {
    /// The input data is damaged and could not be parsed.
    ///
    /// Raised by the body header parser, the instruction decoder and the
    /// signature parser when bytes do not conform to ECMA-335. Carries the
    /// source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The construct is valid but not supported by this engine.
    #[error("This construct is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Maximum recursion depth was exceeded while parsing a signature.
    #[error("Exceeded maximum recursion depth - {0}")]
    RecursionLimit(usize),

    /// An emitted method body exceeds a structural size limit of the format.
    ///
    /// Raised during serialization, e.g. when a branch displacement can no
    /// longer be encoded in the operand width the instruction carries.
    #[error("Emitted body violates a structural limit - {0}")]
    SizeLimit(String),

    /// The module's metadata store rejected a read or write.
    ///
    /// Always recoverable at pass granularity: the affected method is left
    /// unmodified and the failure is never surfaced to the host's
    /// compilation pipeline.
    #[error("Metadata store operation failed - {0}")]
    Store(String),

    /// The host handle does not provide the profiling capabilities this
    /// engine requires. Fatal for the engine instance.
    #[error("Host does not provide the required profiling capabilities")]
    Incapable,

    /// A second engine instance was constructed in the same process.
    ///
    /// Exactly one active instance per process is a construction-time
    /// invariant; re-initialization after shutdown is not supported either.
    #[error("An engine instance has already been initialized in this process")]
    AlreadyInitialized,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn malformed_macro_captures_location() {
        let err = malformed_error!("bad byte {:02X}", 0xABu8);
        match err {
            crate::Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad byte AB");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("expected Malformed"),
        }
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            crate::Error::Store("read-only module".to_string()).to_string(),
            "Metadata store operation failed - read-only module"
        );
        assert_eq!(
            crate::Error::OutOfBounds.to_string(),
            "Out of Bound read would have occurred!"
        );
    }
}
