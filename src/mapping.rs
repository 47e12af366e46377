//! Index mapping applied by the startup bootstrap.
//!
//! The built-in mapping indexes the compendium's spatial extent as a
//! `geo_shape` and copies DOIs into a catch-all field analyzed with the
//! configured analyzer, so identifiers containing special characters stay
//! searchable. `elasticsearch.mapping_file` replaces it wholesale.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::config::ElasticsearchConfig;

pub fn default_mapping(analyzer: &str, special_char_field: &str) -> Value {
    json!({
        "properties": {
            special_char_field: {
                "type": "text",
                "analyzer": analyzer
            },
            "metadata": {
                "properties": {
                    "o2r": {
                        "properties": {
                            "spatial": {
                                "properties": {
                                    "union": {
                                        "properties": {
                                            "geojson": {
                                                "properties": {
                                                    "geometry": {
                                                        "type": "geo_shape"
                                                    }
                                                }
                                            }
                                        }
                                    }
                                }
                            },
                            "identifier": {
                                "properties": {
                                    "doi": {
                                        "type": "text",
                                        "copy_to": special_char_field
                                    },
                                    "doiurl": {
                                        "type": "text",
                                        "copy_to": special_char_field
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// The mapping from `mapping_file` if set, else the built-in one.
pub fn load_mapping(config: &ElasticsearchConfig) -> Result<Value> {
    match &config.mapping_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;
            let mapping: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse mapping file: {}", path.display()))?;
            if !mapping.is_object() {
                anyhow::bail!("mapping file {} must hold a JSON object", path.display());
            }
            Ok(mapping)
        }
        None => Ok(default_mapping(&config.analyzer, &config.special_char_field)),
    }
}
