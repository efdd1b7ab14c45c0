//! Service catalog returned by the identity service and endpoint selection over it.

// self
use crate::{_prelude::*, error::ConfigError, util::normalize_url};

/// Endpoint interface advertised in the catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
	/// Publicly reachable endpoint.
	#[default]
	Public,
	/// Endpoint on the deployment's internal network.
	Internal,
	/// Administrative endpoint.
	Admin,
}
impl Interface {
	/// Returns the catalog label for the interface.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Public => "public",
			Self::Internal => "internal",
			Self::Admin => "admin",
		}
	}
}
impl Display for Interface {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Service catalog attached to a credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
	/// Catalog entries, one per service.
	pub entries: Vec<CatalogEntry>,
}
impl ServiceCatalog {
	/// Creates a catalog from the provided entries.
	pub fn new(entries: impl Into<Vec<CatalogEntry>>) -> Self {
		Self { entries: entries.into() }
	}

	/// Finds the single endpoint matching `opts` and returns its normalized base URL.
	///
	/// Entries must match the service type and, when given, the name. Endpoints must match the
	/// interface and, when given, the region (by name or id). Zero or several matches are
	/// errors.
	pub fn resolve(&self, opts: &EndpointOpts) -> Result<Url> {
		let candidates = self
			.entries
			.iter()
			.filter(|entry| {
				entry.service_type == opts.service_type
					&& opts.name.as_deref().is_none_or(|name| entry.name == name)
			})
			.flat_map(|entry| entry.endpoints.iter())
			.filter(|endpoint| {
				endpoint.interface == opts.interface
					&& opts.region.as_deref().is_none_or(|region| endpoint.in_region(region))
			})
			.collect::<Vec<_>>();

		match candidates.as_slice() {
			[] => Err(ConfigError::EndpointNotFound { service_type: opts.service_type.clone() }
				.into()),
			[endpoint] => {
				let normalized = normalize_url(&endpoint.url);

				Url::parse(&normalized)
					.map_err(|source| ConfigError::invalid_url(normalized, source).into())
			},
			many => Err(ConfigError::MultipleEndpoints {
				service_type: opts.service_type.clone(),
				count: many.len(),
			}
			.into()),
		}
	}
}

/// Catalog record for one service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
	/// Service type, e.g. `compute` or `network`.
	#[serde(rename = "type")]
	pub service_type: String,
	/// Service name, e.g. `nova`.
	#[serde(default)]
	pub name: String,
	/// Catalog identifier.
	#[serde(default)]
	pub id: String,
	/// Endpoints published for the service.
	#[serde(default)]
	pub endpoints: Vec<CatalogEndpoint>,
}

/// One published endpoint of a catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEndpoint {
	/// Endpoint identifier.
	#[serde(default)]
	pub id: String,
	/// Interface the endpoint serves.
	pub interface: Interface,
	/// Region name.
	#[serde(default)]
	pub region: String,
	/// Region identifier.
	#[serde(default)]
	pub region_id: String,
	/// Base URL.
	pub url: String,
}
impl CatalogEndpoint {
	fn in_region(&self, region: &str) -> bool {
		self.region == region || self.region_id == region
	}
}

/// Selection criteria for a catalog endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointOpts {
	/// Required service type.
	pub service_type: String,
	/// Optional service name.
	#[serde(default)]
	pub name: Option<String>,
	/// Optional region name or id.
	#[serde(default)]
	pub region: Option<String>,
	/// Interface to select (defaults to public).
	#[serde(default)]
	pub interface: Interface,
}
impl EndpointOpts {
	/// Selects the public endpoint of `service_type` in any region.
	pub fn new(service_type: impl Into<String>) -> Self {
		Self { service_type: service_type.into(), name: None, region: None, interface: Interface::Public }
	}

	/// Restricts the match to a service name.
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());

		self
	}

	/// Restricts the match to a region.
	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.region = Some(region.into());

		self
	}

	/// Selects a different interface.
	pub fn with_interface(mut self, interface: Interface) -> Self {
		self.interface = interface;

		self
	}
}
