/// Errors that can occur when scanning processors or replaying dump files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller named a dump format this crate does not know.
    #[error("unknown dump format: {name}")]
    UnknownFormat {
        /// The name as given by the caller.
        name: String,
    },

    /// No logical processors were found (or none survived decoding).
    #[error("no logical processors found")]
    NoProcessors,

    /// The caller selected a processor id that is not in the data.
    #[error("no processor with id {id}")]
    UnknownProcessor {
        /// The id as given by the caller.
        id: crate::ProcessorId,
    },

    /// Reading a dump file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shorthand for results of this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_thread_safe() {
        static_assertions::assert_impl_all!(Error: Send, Sync, std::fmt::Debug);
    }

    #[test]
    fn messages_carry_the_offending_value() {
        let error = Error::UnknownFormat {
            name: "yaml".to_string(),
        };
        assert!(error.to_string().contains("yaml"));

        let error = Error::UnknownProcessor { id: 17 };
        assert!(error.to_string().contains("17"));
    }
}
