use std::convert::From;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::result;

/// StatusCode enumerates the failure modes a reader or builder in this
/// crate can hit. The variants match the error kinds mandated by the
/// on-disk format rather than every possible `std::io::Error` variant.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(dead_code)]
pub enum StatusCode {
    OK,

    /// CRC mismatch, magic mismatch, or an out-of-range width/count field
    /// while decoding a header.
    CorruptHeader,
    /// `rank1`/`select1`/`get` (etc.) called with an index at or past size.
    OutOfRange,
    /// `push_back` past `2^32` entries/bytes, a width wider than 64 bits, or
    /// a low-water value that overflows its packed field.
    LengthError,
    /// Unsupported block unit size, a sort-order violation while
    /// `input_sorted` was asserted, or a broken `upper_bound_at_pos`
    /// precondition.
    InvalidArgument,
    /// A method was called on a builder/object in the wrong lifecycle state
    /// (e.g. `save` before `encode`, `load` twice).
    InvalidState,
    /// The underlying allocator returned null, or a `Vec` grow failed.
    AllocError,
    /// Two identical keys were inserted into the same crit-bit trie block
    /// and the configured `DuplicateKeyPolicy` rejects them.
    DuplicateKey,
    /// The current platform cannot support the requested operation (e.g.
    /// `resize_with_uintbits` on a 32-bit target).
    Unsupported,
    IOError,
}

/// Status encapsulates a `StatusCode` and a human-readable message. It can
/// be displayed and also implements `Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub err: String,
}

impl Default for Status {
    fn default() -> Status {
        Status {
            code: StatusCode::OK,
            err: String::new(),
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter) -> result::Result<(), fmt::Error> {
        fmt.write_str(&self.err)
    }
}

impl Error for Status {}

impl Status {
    pub fn new(code: StatusCode, msg: &str) -> Status {
        let err = if msg.is_empty() {
            format!("{:?}", code)
        } else {
            format!("{:?}: {}", code, msg)
        };
        Status { code, err }
    }

    /// Prefixes the error message with additional context while propagating
    /// it up the call stack, e.g. turning "i >= size" into
    /// "SortedUintVec::get: i >= size".
    pub fn annotate<S: AsRef<str>>(self, msg: S) -> Status {
        Status {
            code: self.code,
            err: format!("{}: {}", msg.as_ref(), self.err),
        }
    }
}

/// This crate's result type.
pub type Result<T> = result::Result<T, Status>;

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Status {
        let c = match e.kind() {
            io::ErrorKind::InvalidData => StatusCode::CorruptHeader,
            io::ErrorKind::InvalidInput => StatusCode::InvalidArgument,
            _ => StatusCode::IOError,
        };
        Status::new(c, &e.to_string())
    }
}
