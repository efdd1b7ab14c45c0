//! Builder collaborators that turn typed option structs into query strings and request bodies.
//!
//! Per-resource option types implement [`QueryBuilder`] or [`BodyBuilder`]; the request core
//! only ever sees the opaque string or map they produce. Most implementations delegate to
//! [`build_query_string`] and [`build_request_body`], which work on any serde-serializable
//! options struct.

// crates.io
use serde_json::{Map, Value};
use url::form_urlencoded;
// self
use crate::{_prelude::*, error::ConfigError};

/// Produces a query-string fragment (including the leading `?`, or empty).
pub trait QueryBuilder {
	/// Renders the options as a query string.
	fn to_query(&self) -> Result<String>;
}

/// Produces a JSON request body.
pub trait BodyBuilder {
	/// Renders the options as a JSON object.
	fn to_body(&self) -> Result<Map<String, Value>>;
}

/// Serializes `opts` into a query string with sorted keys.
///
/// Null fields are skipped, arrays become repeated keys, and scalars are rendered without
/// quoting. Nested objects are rejected. Returns an empty string when nothing is set.
pub fn build_query_string<T>(opts: &T) -> Result<String>
where
	T: ?Sized + Serialize,
{
	let Value::Object(fields) = serde_json::to_value(opts).map_err(ConfigError::from)? else {
		return Err(invalid("query options must serialize to an object"));
	};
	let sorted = fields.into_iter().collect::<BTreeMap<_, _>>();
	let mut query = form_urlencoded::Serializer::new(String::new());

	for (key, value) in sorted {
		match value {
			Value::Null => (),
			Value::Array(items) =>
				for item in items {
					query.append_pair(&key, &scalar(&key, item)?);
				},
			value => {
				query.append_pair(&key, &scalar(&key, value)?);
			},
		}
	}

	let query = query.finish();

	Ok(if query.is_empty() { query } else { format!("?{query}") })
}

/// Serializes `opts` into a JSON object, optionally nested under `parent`.
pub fn build_request_body<T>(opts: &T, parent: Option<&str>) -> Result<Map<String, Value>>
where
	T: ?Sized + Serialize,
{
	let Value::Object(body) = serde_json::to_value(opts).map_err(ConfigError::from)? else {
		return Err(invalid("request options must serialize to an object"));
	};

	Ok(match parent {
		Some(parent) => Map::from_iter([(parent.to_owned(), Value::Object(body))]),
		None => body,
	})
}

fn scalar(key: &str, value: Value) -> Result<String> {
	match value {
		Value::String(s) => Ok(s),
		Value::Number(n) => Ok(n.to_string()),
		Value::Bool(b) => Ok(b.to_string()),
		_ => Err(invalid(format!("query field `{key}` must be a scalar or a list of scalars"))),
	}
}

fn invalid(reason: impl Into<String>) -> Error {
	ConfigError::InvalidOptions { reason: reason.into() }.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[derive(Serialize)]
	struct ListOpts {
		j: u32,
		r: &'static str,
		c: bool,
		s: Vec<&'static str>,
		ti: Vec<i32>,
		#[serde(skip_serializing_if = "Option::is_none")]
		marker: Option<String>,
		name: Option<String>,
	}

	#[test]
	fn query_strings_sort_and_repeat_keys() {
		let opts = ListOpts {
			j: 2,
			r: "red",
			c: true,
			s: vec!["one", "two", "three"],
			ti: vec![1, 2],
			marker: None,
			name: None,
		};

		assert_eq!(
			build_query_string(&opts).expect("List options should encode."),
			"?c=true&j=2&r=red&s=one&s=two&s=three&ti=1&ti=2"
		);
	}

	#[test]
	fn query_strings_escape_values() {
		let opts = serde_json::json!({ "name": "a b&c", "empty": null });

		assert_eq!(build_query_string(&opts).expect("Escaping should work."), "?name=a+b%26c");
		assert_eq!(build_query_string(&serde_json::json!({})).expect("Empty object."), "");
	}

	#[test]
	fn query_strings_reject_nested_objects() {
		let err = build_query_string(&serde_json::json!({ "meta": { "k": "v" } }))
			.expect_err("Nested objects have no query encoding.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidOptions { .. })));
		assert!(build_query_string(&4).is_err());
	}

	#[test]
	fn request_bodies_nest_under_parent() {
		#[derive(Serialize)]
		struct CreateOpts {
			name: &'static str,
		}

		let body = build_request_body(&CreateOpts { name: "web" }, Some("server"))
			.expect("Create options should encode.");

		assert_eq!(Value::Object(body), serde_json::json!({ "server": { "name": "web" } }));

		let body = build_request_body(&CreateOpts { name: "web" }, None)
			.expect("Create options should encode without a parent.");

		assert_eq!(Value::Object(body), serde_json::json!({ "name": "web" }));
	}
}
