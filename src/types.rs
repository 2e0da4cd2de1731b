//! Core domain types: opaque ids and the ordered enumerations from the data model.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around `i64` with the full trait suite the tracker needs:
/// conversions to/from `i64`, `Display`/`FromStr`, and manual `sqlx` `Type`/`Encode`/`Decode`
/// impls so the id can be bound and fetched like any other column.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Wrap a raw row id.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Unwrap the raw row id.
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl PartialEq<i64> for $name {
            fn eq(&self, other: &i64) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for i64 {
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

define_id!(
    /// Identifies a contributing `Centre`.
    CentreId
);
define_id!(
    /// Identifies a `FileSource` (a remote endpoint owned by a centre).
    FileSourceId
);
define_id!(
    /// Identifies a `ZipFile` (an archive ever seen, unique by filename).
    ZipFileId
);
define_id!(
    /// Identifies a `ZipAction` (a (ZipFile, ProcessingType) pair).
    ZipActionId
);
define_id!(
    /// Identifies a `FileSourceHasZip` hosting relation.
    FileSourceHasZipId
);
define_id!(
    /// Identifies a `ZipDownload` attempt.
    ZipDownloadId
);
define_id!(
    /// Identifies an `XmlFile` (an inner document inside a download).
    XmlFileId
);
define_id!(
    /// Identifies a `CrawlingSession` (one pipeline invocation).
    SessionId
);
define_id!(
    /// Identifies a `SessionTask` (one subprocess invocation inside a session).
    SessionTaskId
);
define_id!(
    /// Identifies a `ZipLog` row anchored to a `ZipDownload`.
    ZipLogId
);
define_id!(
    /// Identifies an `XmlLog` row anchored to an `XmlFile`.
    XmlLogId
);
define_id!(
    /// Identifies an interned `AnException` short-name.
    ExceptionId
);

/// Ordered pipeline stage. **Declaration order is semantic** — it is the id order used by the
/// phase-status escalation matrix (§4.1) and must equal the insertion order of the seeded
/// `phase` table rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The archive itself is being fetched from the remote source.
    Download,
    /// The archive's filename is being tokenized into centre/date/increment.
    ZipName,
    /// Reserved checksum-verification stage (seeded for schema completeness; not driven by
    /// any worker in this implementation).
    ZipMd5,
    /// The archive is being unpacked to its `.contents/` directory.
    Unzip,
    /// An inner document's filename is being tokenized.
    XmlName,
    /// An inner document is being validated against its XML schema.
    Xsd,
    /// The document is being handed to the external serializer.
    Upload,
    /// The document's row data is being checked and context-built.
    Data,
    /// The document's warehouse context is being built.
    Context,
    /// The overview database is being rebuilt for this document.
    Overview,
    /// Terminal quality-control phase a successfully ingested document rests in.
    Qc,
}

impl Phase {
    /// All phases in id order.
    pub const ALL: [Phase; 11] = [
        Phase::Download,
        Phase::ZipName,
        Phase::ZipMd5,
        Phase::Unzip,
        Phase::XmlName,
        Phase::Xsd,
        Phase::Upload,
        Phase::Data,
        Phase::Context,
        Phase::Overview,
        Phase::Qc,
    ];

    /// Numeric id used for tracker storage and matrix comparisons.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Reconstruct a `Phase` from its stored numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }
}

/// Ordered severity of a (phase, status) pair. **Declaration order is semantic**: pending <
/// running < done < cancelled < failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not yet attempted.
    Pending,
    /// Currently in progress.
    Running,
    /// Completed successfully.
    Done,
    /// Abandoned without success or failure (not produced by any worker today, reserved).
    Cancelled,
    /// Failed terminally for this phase.
    Failed,
}

impl Status {
    /// All statuses in id order.
    pub const ALL: [Status; 5] = [
        Status::Pending,
        Status::Running,
        Status::Done,
        Status::Cancelled,
        Status::Failed,
    ];

    /// Numeric id used for tracker storage and matrix comparisons.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Reconstruct a `Status` from its stored numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }

    /// Whether this status represents a terminal failure.
    pub fn is_failed(self) -> bool {
        self == Status::Failed
    }
}

/// Which of the three contributor sub-directories a package was discovered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    /// `add/` — a new submission.
    Add,
    /// `edit/` — a resubmission of previously ingested data.
    Edit,
    /// `delete/` — a retraction.
    Delete,
}

impl ProcessingType {
    /// Numeric id used for tracker storage.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Reconstruct a `ProcessingType` from its stored numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ProcessingType::Add),
            1 => Some(ProcessingType::Edit),
            2 => Some(ProcessingType::Delete),
            _ => None,
        }
    }

    /// The sub-directory name this processing type is discovered under.
    pub fn dir_name(self) -> &'static str {
        match self {
            ProcessingType::Add => "add",
            ProcessingType::Edit => "edit",
            ProcessingType::Delete => "delete",
        }
    }

    /// All three processing types, in the fixed directory-walk order used by discovery.
    pub const ALL: [ProcessingType; 3] = [
        ProcessingType::Add,
        ProcessingType::Edit,
        ProcessingType::Delete,
    ];
}

/// Transport used to reach a `FileSource`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProtocol {
    /// FTP, binary mode.
    Ftp,
    /// SFTP, password or public-key (from the local agent identity).
    Sftp,
    /// Seeded for schema completeness; no discovery driver is registered for it (see
    /// design-notes open questions).
    Http,
}

impl SourceProtocol {
    /// Numeric id used for tracker storage.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Reconstruct a `SourceProtocol` from its stored numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(SourceProtocol::Ftp),
            1 => Some(SourceProtocol::Sftp),
            2 => Some(SourceProtocol::Http),
            _ => None,
        }
    }
}

/// Availability of a `FileSource`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Normal, crawlable.
    Available,
    /// Temporarily excluded from discovery.
    Maintenance,
    /// Permanently excluded; retained for history only.
    Removed,
}

impl ResourceState {
    /// Numeric id used for tracker storage.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Reconstruct a `ResourceState` from its stored numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ResourceState::Available),
            1 => Some(ResourceState::Maintenance),
            2 => Some(ResourceState::Removed),
            _ => None,
        }
    }
}
