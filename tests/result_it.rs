#![cfg(all(feature = "reqwest", feature = "test"))]

// crates.io
use serde_json::{Map, Value, json};
// self
use openstack_core::{
	_preludet::*,
	error::DecodeError,
	result::{self, capacity},
};

#[derive(Debug, Deserialize)]
struct Person {
	first_name: String,
	last_name: String,
}

#[derive(Debug, Deserialize)]
struct Hypervisor {
	hypervisor_hostname: String,
	#[serde(deserialize_with = "capacity::deserialize")]
	vcpus: f64,
	#[serde(default, deserialize_with = "capacity::option::deserialize")]
	memory_mb: Option<f64>,
}

#[test]
fn remaining_keys_keep_undeclared_fields() {
	let raw = json!({ "first_name": "Jane", "last_name": "Doe", "city": "Fremont", "state": "CA" });
	let raw = raw.as_object().expect("Fixture should be an object.");
	let person = result::extract_value::<Person>(Value::Object(raw.clone()), None)
		.expect("Declared fields should decode.");
	let rest = result::remaining_keys::<Person>(raw);

	assert_eq!((person.first_name.as_str(), person.last_name.as_str()), ("Jane", "Doe"));
	assert_eq!(
		rest,
		Map::from_iter([("city".into(), json!("Fremont")), ("state".into(), json!("CA"))])
	);
}

#[test]
fn capacity_fields_decode_inside_listings() {
	let body = br#"{"hypervisors":[
		{"hypervisor_hostname":"hv-1","vcpus":64,"memory_mb":"infinite"},
		{"hypervisor_hostname":"hv-2","vcpus":"unknown"}
	]}"#;
	let hypervisors =
		result::extract_into::<Vec<Hypervisor>>(body, Some("hypervisors")).expect("Listing should decode.");

	assert_eq!(hypervisors[0].hypervisor_hostname, "hv-1");
	assert_eq!(hypervisors[0].vcpus, 64.0);
	assert_eq!(hypervisors[0].memory_mb, Some(f64::INFINITY));
	assert_eq!(hypervisors[1].vcpus, 0.0);
	assert_eq!(hypervisors[1].memory_mb, None);
}

#[test]
fn invalid_capacity_literals_report_their_path() {
	let body = br#"{"hypervisors":[{"hypervisor_hostname":"hv-1","vcpus":"plenty"}]}"#;
	let err = result::extract_into::<Vec<Hypervisor>>(body, Some("hypervisors"))
		.expect_err("Unknown literals must fail.");

	match err {
		Error::Decode(DecodeError::Json { source }) =>
			assert_eq!(source.path().to_string(), "[0].vcpus"),
		other => panic!("Unexpected error: {other:?}."),
	}
}
