use thiserror::Error;

/// Resource failures that abort a single transport operation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LtpError {
    #[error("payload of {len} bytes needs {fragments} fragments, exceeding the sequence number space")]
    PayloadTooLarge { len: usize, fragments: usize },

    #[error("fragment of {len} bytes does not fit a DATA frame")]
    FragmentTooLarge { len: usize },

    #[error("MTU leaves no room for fragment payload")]
    NoFragmentCapacity,
}
