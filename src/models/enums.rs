use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(DocumentStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

/// Extraction strategy selector derived from the free-form category string
/// a document was uploaded with.
///
/// Parsing never fails: anything unrecognized routes to the default
/// extractor, same as `form` and `auto-detect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Certificate,
    Resume,
    License,
    Form,
    AutoDetect,
}

impl Category {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "certificate" => Self::Certificate,
            "resume" => Self::Resume,
            "license" => Self::License,
            "form" => Self::Form,
            _ => Self::AutoDetect,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Resume => "resume",
            Self::License => "license",
            Self::Form => "form",
            Self::AutoDetect => "auto-detect",
        }
    }
}
