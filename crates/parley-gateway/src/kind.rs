//! Closed set of provider identities.

use std::fmt;

/// A provider ID resolved once per request.
///
/// Unknown IDs parse to [`ProviderKind::Unsupported`] so the gateway can
/// report them instead of failing to parse.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// `OPEN_AI`.
    OpenAi,
    /// `CUSTOM_REST_API`.
    CustomRestApi,
    /// `AWS_BEDROCK`.
    AwsBedrock,
    /// `YANDEX_FM`.
    YandexFm,
    /// Anything else, carrying the raw ID.
    Unsupported(String),
}

impl ProviderKind {
    /// Every known provider, in catalog order.
    pub fn known() -> [Self; 4] {
        [Self::OpenAi, Self::CustomRestApi, Self::AwsBedrock, Self::YandexFm]
    }

    /// Parse a provider ID. Matching is case-insensitive.
    pub fn parse(id: &str) -> Self {
        match id.trim().to_ascii_uppercase().as_str() {
            "OPEN_AI" => Self::OpenAi,
            "CUSTOM_REST_API" => Self::CustomRestApi,
            "AWS_BEDROCK" => Self::AwsBedrock,
            "YANDEX_FM" => Self::YandexFm,
            _ => Self::Unsupported(id.to_owned()),
        }
    }

    /// Wire ID.
    pub fn id(&self) -> &str {
        match self {
            Self::OpenAi => "OPEN_AI",
            Self::CustomRestApi => "CUSTOM_REST_API",
            Self::AwsBedrock => "AWS_BEDROCK",
            Self::YandexFm => "YANDEX_FM",
            Self::Unsupported(id) => id,
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::CustomRestApi => "Custom REST API",
            Self::AwsBedrock => "AWS Bedrock",
            Self::YandexFm => "Yandex FM",
            Self::Unsupported(id) => id,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl From<&str> for ProviderKind {
    fn from(id: &str) -> Self {
        Self::parse(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_ids() {
        for kind in ProviderKind::known() {
            assert_eq!(ProviderKind::parse(kind.id()), kind);
        }
        assert_eq!(ProviderKind::parse("open_ai"), ProviderKind::OpenAi);
    }

    #[test]
    fn unknown_id_is_kept() {
        let kind = ProviderKind::parse("GEMINI");
        assert_eq!(kind, ProviderKind::Unsupported("GEMINI".into()));
        assert_eq!(kind.to_string(), "GEMINI");
    }
}
