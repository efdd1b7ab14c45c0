//! Decoding helpers for response bodies.
//!
//! [`extract_into`] decodes a body, or one key of its envelope, into a caller-declared shape and
//! reports failures with the JSON path that broke. [`remaining_keys`] returns the raw fields a
//! shape does not declare, so wrappers can keep server-added fields without failing decode.
//! [`capacity`] decodes the number-or-literal quota fields some services return.

// crates.io
use serde::{
	Deserializer,
	de::{self, DeserializeOwned, Visitor},
};
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, error::DecodeError};

/// Decodes `body` into `T`, optionally descending into the top-level `label` key first.
///
/// Unknown keys are ignored unless `T` opts into `deny_unknown_fields`.
pub fn extract_into<T>(body: &[u8], label: Option<&str>) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(body);

	match label {
		None => Ok(serde_path_to_error::deserialize(&mut deserializer)?),
		Some(label) => {
			let value = serde_path_to_error::deserialize::<_, Value>(&mut deserializer)?;

			extract_value(value, Some(label))
		},
	}
}

/// Decodes an already parsed JSON value, optionally descending into `label` first.
pub fn extract_value<T>(value: Value, label: Option<&str>) -> Result<T>
where
	T: DeserializeOwned,
{
	let value = match label {
		None => value,
		Some(label) => match value {
			Value::Object(mut envelope) => envelope
				.remove(label)
				.ok_or_else(|| DecodeError::MissingKey { key: label.to_owned() })?,
			_ =>
				return Err(DecodeError::InvalidEnvelope {
					reason: format!("expected an object carrying `{label}`"),
				}
				.into()),
		},
	};

	Ok(serde_path_to_error::deserialize(value)?)
}

/// Returns the entries of `raw` whose keys are not declared as fields of `T`.
///
/// Field names are taken from `T`'s derived `Deserialize` impl, so `rename` attributes are
/// honored. Shapes that are not plain structs declare no fields and keep every entry.
pub fn remaining_keys<T>(raw: &Map<String, Value>) -> Map<String, Value>
where
	T: DeserializeOwned,
{
	let declared = declared_fields::<T>();

	raw.iter()
		.filter(|(key, _)| !declared.contains(&key.as_str()))
		.map(|(key, value)| (key.clone(), value.clone()))
		.collect()
}

fn declared_fields<T>() -> &'static [&'static str]
where
	T: DeserializeOwned,
{
	let mut fields = &[][..];
	let _ = T::deserialize(FieldCapture { fields: &mut fields });

	fields
}

/// Deserializer that records the field list handed to `deserialize_struct` and then bails out.
struct FieldCapture<'a> {
	fields: &'a mut &'static [&'static str],
}
impl<'de> Deserializer<'de> for FieldCapture<'_> {
	type Error = de::value::Error;

	fn deserialize_any<V>(self, _visitor: V) -> Result<V::Value, Self::Error>
	where
		V: Visitor<'de>,
	{
		Err(de::Error::custom("field capture only inspects structs"))
	}

	fn deserialize_struct<V>(
		self,
		_name: &'static str,
		fields: &'static [&'static str],
		_visitor: V,
	) -> Result<V::Value, Self::Error>
	where
		V: Visitor<'de>,
	{
		*self.fields = fields;

		Err(de::Error::custom("fields captured"))
	}

	serde::forward_to_deserialize_any! {
		bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
		bytes byte_buf option unit unit_struct newtype_struct seq tuple
		tuple_struct map enum identifier ignored_any
	}
}

pub mod capacity {
	//! `deserialize_with` helpers for quota fields that may hold a number or a literal.
	//!
	//! Numbers pass through unchanged, `"infinite"` becomes [`f64::INFINITY`], and `"unknown"`
	//! becomes `0.0`. Any other string or type is a decode error.
	//!
	//! ```
	//! #[derive(serde::Deserialize)]
	//! struct Quota {
	//! 	#[serde(deserialize_with = "openstack_core::result::capacity::deserialize")]
	//! 	total: f64,
	//! 	#[serde(default, deserialize_with = "openstack_core::result::capacity::option::deserialize")]
	//! 	free: Option<f64>,
	//! }
	//!
	//! let quota: Quota = serde_json::from_str(r#"{"total":"infinite"}"#).unwrap();
	//!
	//! assert!(quota.total.is_infinite());
	//! assert_eq!(quota.free, None);
	//! ```

	// self
	use super::*;

	/// Literal for an unbounded capacity.
	pub const INFINITE: &str = "infinite";
	/// Literal for a capacity the backend cannot report.
	pub const UNKNOWN: &str = "unknown";

	/// Decodes a required capacity field.
	pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
	where
		D: Deserializer<'de>,
	{
		deserializer.deserialize_any(CapacityVisitor)
	}

	pub mod option {
		//! Variant for optional fields; pair it with `#[serde(default)]` so absent keys decode to
		//! `None`.

		// self
		use super::*;

		/// Decodes an optional capacity field; `null` decodes to `None`.
		pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
		where
			D: Deserializer<'de>,
		{
			#[derive(Deserialize)]
			struct Capacity(#[serde(deserialize_with = "super::deserialize")] f64);

			Ok(Option::<Capacity>::deserialize(deserializer)?.map(|Capacity(value)| value))
		}
	}

	struct CapacityVisitor;
	impl Visitor<'_> for CapacityVisitor {
		type Value = f64;

		fn expecting(&self, f: &mut Formatter) -> FmtResult {
			write!(f, "a number, \"{INFINITE}\", or \"{UNKNOWN}\"")
		}

		fn visit_i64<E>(self, v: i64) -> Result<f64, E>
		where
			E: de::Error,
		{
			Ok(v as f64)
		}

		fn visit_u64<E>(self, v: u64) -> Result<f64, E>
		where
			E: de::Error,
		{
			Ok(v as f64)
		}

		fn visit_f64<E>(self, v: f64) -> Result<f64, E>
		where
			E: de::Error,
		{
			Ok(v)
		}

		fn visit_str<E>(self, v: &str) -> Result<f64, E>
		where
			E: de::Error,
		{
			match v {
				INFINITE => Ok(f64::INFINITY),
				UNKNOWN => Ok(0.0),
				other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
			}
		}
	}
}
