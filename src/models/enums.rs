use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serialized names match `as_str`, so JSON output stays stable.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Provenance {
    Extracted => "extracted",
    Normalized => "normalized",
    Missing => "missing",
});

str_enum!(RuleClass {
    Required => "required",
    Advisory => "advisory",
});

str_enum!(EngineStatus {
    Ok => "ok",
    Empty => "empty",
    Failed => "failed",
    TimedOut => "timed_out",
});

str_enum!(OcrQuality {
    VeryLow => "very_low",
    Low => "low",
    Moderate => "moderate",
    High => "high",
    VeryHigh => "very_high",
});

str_enum!(PipelineStage {
    Import => "import",
    Recognition => "recognition",
    Reconciliation => "reconciliation",
    Extraction => "extraction",
    Normalization => "normalization",
    Validation => "validation",
});

str_enum!(EntryStatus {
    Succeeded => "succeeded",
    Failed => "failed",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provenance_round_trips_through_str() {
        for p in [Provenance::Extracted, Provenance::Normalized, Provenance::Missing] {
            assert_eq!(Provenance::from_str(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = RuleClass::from_str("optional").unwrap_err();
        assert!(err.to_string().contains("RuleClass"));
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&EngineStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        let back: OcrQuality = serde_json::from_str("\"very_high\"").unwrap();
        assert_eq!(back, OcrQuality::VeryHigh);
    }
}
