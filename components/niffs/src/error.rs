use core::fmt;

/// Offset of all numeric error codes, an error maps to `-(ERR_BASE + n)`.
pub const ERR_BASE: i32 = 11000;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Logs the error site and returns the error from the enclosing function.
macro_rules! bail {
    ($err:expr) => {{
        let err = $err;
        debug!("err {:?} @ {}:{}", err, file!(), line!());
        return Err(err);
    }};
}

macro_rules! error_codes {
    ($($(#[doc = $doc:literal])* $variant:ident = $num:expr,)+) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Error {
            $(
                $(#[doc = $doc])*
                $variant,
            )+
        }

        impl Error {
            /// Stable numeric code of this error.
            pub const fn code(self) -> i32 {
                match self {
                    $(Error::$variant => -(ERR_BASE + $num),)+
                }
            }
        }

        impl TryFrom<i32> for Error {
            type Error = UnknownErrorCode;

            fn try_from(code: i32) -> Result<Self, UnknownErrorCode> {
                $(
                    if code == -(ERR_BASE + $num) {
                        return Ok(Error::$variant);
                    }
                )+
                Err(UnknownErrorCode(code))
            }
        }
    };
}

error_codes! {
    /// Configuration rejected at init, or feature not available in this layout.
    BadConf = 1,
    /// More than one sector carries a bad magic.
    NotAFilesystem = 2,
    BadSector = 3,
    DeletingFreePage = 4,
    DeletingDeletedPage = 5,
    MovingFreePage = 6,
    MovingDeletedPage = 7,
    MovingToUnfreePage = 8,
    MovingToSamePage = 9,
    MovingBadFlag = 10,
    NoFreePage = 11,
    /// Sector header did not read back after formatting.
    SectorUnformattable = 12,
    NoFreeId = 14,
    WrPhdrUnfreePage = 15,
    WrPhdrBadId = 16,
    NameConflict = 17,
    /// Not enough reclaimable pages for the operation.
    Full = 18,
    OutOfFiledescs = 19,
    FileNotFound = 20,
    FiledescClosed = 21,
    FiledescBad = 22,
    IncoherentId = 23,
    PageNotFound = 24,
    EndOfFile = 25,
    ModifyBeyondFile = 26,
    TruncateBeyondFile = 27,
    NoGcCandidate = 28,
    PageDeleted = 29,
    PageFree = 30,
    Mounted = 31,
    NotMounted = 32,
    NotWritable = 33,
    NotReadable = 34,
    FileExists = 35,
    /// Less than one sector worth of free pages and nothing to reclaim.
    Overflow = 36,
    LinearFile = 37,
    LinearNoSpace = 38,
    /// Garbage collection was entered while already running.
    GcReentered = 39,
    /// The flash driver reported a failure.
    Hal = 40,
    /// Formatting diagnostics output failed.
    Fmt = 41,
}

/// A numeric code not belonging to any [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownErrorCode(pub i32);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::Fmt
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
