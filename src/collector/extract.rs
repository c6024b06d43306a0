//! Value and label extraction from result documents.

use bson::{Bson, Document};

use crate::mongo::bson_type_name;

use super::CollectorError;

/// Extract the sample value from a document.
///
/// Doubles pass through; 32- and 64-bit integers widen natively. Anything
/// else fails the attempt, naming the offending field and its runtime type.
pub fn metric_value(document: &Document, attribute: &str) -> Result<f64, CollectorError> {
    let value = document
        .get(attribute)
        .ok_or_else(|| CollectorError::AttributeNotFound {
            attribute: attribute.to_string(),
        })?;

    match value {
        Bson::Double(v) => Ok(*v),
        Bson::Int32(v) => Ok(f64::from(*v)),
        Bson::Int64(v) => Ok(*v as f64),
        other => Err(CollectorError::UnsupportedValueType {
            attribute: attribute.to_string(),
            type_name: bson_type_name(other).to_string(),
        }),
    }
}

/// Extract dynamic label values for the given document fields, in order.
///
/// Strings pass through unchanged; integers and doubles use their default
/// base-10 rendering. Anything else fails the attempt.
pub fn tag_values(document: &Document, fields: &[String]) -> Result<Vec<String>, CollectorError> {
    fields
        .iter()
        .map(|field| {
            let value = document
                .get(field)
                .ok_or_else(|| CollectorError::TagAttributeNotFound {
                    attribute: field.clone(),
                })?;

            match value {
                Bson::String(v) => Ok(v.clone()),
                Bson::Double(v) => Ok(v.to_string()),
                Bson::Int32(v) => Ok(v.to_string()),
                Bson::Int64(v) => Ok(v.to_string()),
                other => Err(CollectorError::UnsupportedTagType {
                    attribute: field.clone(),
                    type_name: bson_type_name(other).to_string(),
                }),
            }
        })
        .collect()
}
