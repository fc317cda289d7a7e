//! Schema validation for implementation-specific TOML configuration.
//!
//! Every pluggable implementation publishes a [`ConfigSchema`] so that bad
//! configuration is reported at startup rather than on first use.

use std::str::FromStr;
use thiserror::Error;

use crate::Address;

#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

impl ValidationError {
	fn mismatch(field: &str, expected: &str, value: &toml::Value) -> Self {
		Self::TypeMismatch {
			field: field.to_string(),
			expected: expected.to_string(),
			actual: value.type_str().to_string(),
		}
	}

	/// Prefixes the field path with `parent`.
	fn nested(self, parent: &str) -> Self {
		match self {
			Self::MissingField(f) => Self::MissingField(format!("{parent}.{f}")),
			Self::InvalidValue { field, message } => Self::InvalidValue {
				field: format!("{parent}.{field}"),
				message,
			},
			Self::TypeMismatch {
				field,
				expected,
				actual,
			} => Self::TypeMismatch {
				field: format!("{parent}.{field}"),
				expected,
				actual,
			},
			other => other,
		}
	}
}

#[derive(Debug)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// A 20-byte hex address string.
	Address,
	Array(Box<FieldType>),
	Table(Schema),
}

pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_type(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::mismatch("root", "table", config))?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn check_type(name: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			if !value.is_str() {
				return Err(ValidationError::mismatch(name, "string", value));
			}
		}
		FieldType::Integer { min, max } => {
			let n = value
				.as_integer()
				.ok_or_else(|| ValidationError::mismatch(name, "integer", value))?;
			if let Some(min) = min.filter(|min| n < *min) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("Value {n} is less than minimum {min}"),
				});
			}
			if let Some(max) = max.filter(|max| n > *max) {
				return Err(ValidationError::InvalidValue {
					field: name.to_string(),
					message: format!("Value {n} is greater than maximum {max}"),
				});
			}
		}
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(ValidationError::mismatch(name, "boolean", value));
			}
		}
		FieldType::Address => {
			let s = value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(name, "address string", value))?;
			Address::from_str(s).map_err(|e| ValidationError::InvalidValue {
				field: name.to_string(),
				message: e.to_string(),
			})?;
		}
		FieldType::Array(inner) => {
			let items = value
				.as_array()
				.ok_or_else(|| ValidationError::mismatch(name, "array", value))?;
			for (i, item) in items.iter().enumerate() {
				check_type(&format!("{name}[{i}]"), item, inner)?;
			}
		}
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| e.nested(name))?;
		}
	}

	Ok(())
}

/// Implemented by every pluggable implementation for its `config` table.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn schema() -> Schema {
		Schema::new(
			vec![Field::new("settler", FieldType::Address)],
			vec![
				Field::new(
					"gas_limit",
					FieldType::Integer {
						min: Some(21_000),
						max: None,
					},
				),
				Field::new(
					"inner",
					FieldType::Table(Schema::new(vec![Field::new("name", FieldType::String)], vec![])),
				),
			],
		)
	}

	#[test]
	fn test_valid_config() {
		let config: toml::Value = toml::from_str(
			r#"
			settler = "0x1111111111111111111111111111111111111111"
			gas_limit = 300000
			"#,
		)
		.unwrap();
		assert!(schema().validate(&config).is_ok());
	}

	#[test]
	fn test_missing_required_field() {
		let config: toml::Value = toml::from_str("gas_limit = 300000").unwrap();
		assert!(matches!(
			schema().validate(&config),
			Err(ValidationError::MissingField(f)) if f == "settler"
		));
	}

	#[test]
	fn test_bad_address_and_range() {
		let config: toml::Value = toml::from_str(r#"settler = "0x12""#).unwrap();
		assert!(matches!(
			schema().validate(&config),
			Err(ValidationError::InvalidValue { .. })
		));

		let config: toml::Value = toml::from_str(
			r#"
			settler = "0x1111111111111111111111111111111111111111"
			gas_limit = 5
			"#,
		)
		.unwrap();
		assert!(schema().validate(&config).is_err());
	}

	#[test]
	fn test_nested_field_path() {
		let config: toml::Value = toml::from_str(
			r#"
			settler = "0x1111111111111111111111111111111111111111"
			[inner]
			"#,
		)
		.unwrap();
		assert!(matches!(
			schema().validate(&config),
			Err(ValidationError::MissingField(f)) if f == "inner.name"
		));
	}
}
