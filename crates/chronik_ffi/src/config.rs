//! EDN configuration text to [`DatabaseConfig`].

use crate::error::{GatewayError, GatewayResult};
use chronik_core::DatabaseConfig;

/// Parses a database configuration such as
/// `{:store {:backend :memory :id "app"} :schema-flexibility :read}`.
pub fn parse_config(text: &str) -> GatewayResult<DatabaseConfig> {
    let value = chronik_codec::from_edn_str(text).map_err(|source| GatewayError::Parse {
        what: "database configuration",
        source,
    })?;
    DatabaseConfig::from_value(&value).map_err(|source| GatewayError::Config { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chronik_core::{Backend, SchemaFlexibility};

    #[test]
    fn memory_config() {
        let config =
            parse_config(r#"{:store {:backend :memory :id "cfg"} :schema-flexibility :read}"#).unwrap();
        assert_eq!(config.backend, Backend::Memory { id: "cfg".into() });
        assert_eq!(config.schema_flexibility, SchemaFlexibility::Read);
        assert!(config.keep_history);
    }

    #[test]
    fn malformed_text_is_parse_error() {
        let err = parse_config("{:store").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn bad_shape_names_key() {
        let err = parse_config("{:store {:backend :s3}}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(err.to_sentinel("create_database").contains(":backend"));
    }
}
