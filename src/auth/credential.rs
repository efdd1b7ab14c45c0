//! Immutable credential snapshots handed out by the token authority.

// self
use crate::{
	_prelude::*,
	auth::{EndpointOpts, ServiceCatalog, TokenSecret},
};

/// Token, optional expiry hint, and service catalog produced by one authentication.
///
/// Credentials are replaced, never mutated: the authority swaps in a new `Arc<Credential>` after
/// every successful round, so readers always hold a complete snapshot. Resolved endpoints are
/// cached inside the snapshot and disappear with it.
pub struct Credential {
	token: TokenSecret,
	expires_at: Option<OffsetDateTime>,
	catalog: ServiceCatalog,
	endpoints: Mutex<HashMap<EndpointOpts, Url>>,
}
impl Credential {
	/// Creates a credential without an expiry hint or catalog.
	pub fn new(token: impl Into<String>) -> Self {
		Self {
			token: TokenSecret::new(token),
			expires_at: None,
			catalog: ServiceCatalog::default(),
			endpoints: Default::default(),
		}
	}

	/// Attaches the expiry instant reported by the identity service.
	pub fn with_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Attaches the service catalog.
	pub fn with_catalog(mut self, catalog: ServiceCatalog) -> Self {
		self.catalog = catalog;
		self.endpoints.get_mut().clear();

		self
	}

	/// Returns the token secret.
	pub fn token(&self) -> &TokenSecret {
		&self.token
	}

	/// Returns the expiry hint, if the identity service supplied one.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.expires_at
	}

	/// Returns the service catalog.
	pub fn catalog(&self) -> &ServiceCatalog {
		&self.catalog
	}

	/// Returns `true` if the credential is believed valid at `instant`.
	///
	/// Credentials without an expiry hint are valid until a server rejects them.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_none_or(|expires_at| instant < expires_at)
	}

	/// Resolves the base URL for `opts`, caching the answer with this credential.
	pub fn endpoint(&self, opts: &EndpointOpts) -> Result<Url> {
		if let Some(url) = self.endpoints.lock().get(opts) {
			return Ok(url.clone());
		}

		let url = self.catalog.resolve(opts)?;

		self.endpoints.lock().insert(opts.clone(), url.clone());

		Ok(url)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("token", &self.token)
			.field("expires_at", &self.expires_at)
			.field("catalog_entries", &self.catalog.entries.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::auth::{CatalogEndpoint, CatalogEntry, Interface};

	#[test]
	fn validity_follows_the_expiry_hint() {
		let credential = Credential::new("tok").with_expires_at(macros::datetime!(2025-01-01 01:00 UTC));

		assert!(credential.is_valid_at(macros::datetime!(2025-01-01 00:59 UTC)));
		assert!(!credential.is_valid_at(macros::datetime!(2025-01-01 01:00 UTC)));
		assert!(Credential::new("tok").is_valid_at(macros::datetime!(2999-01-01 00:00 UTC)));
	}

	#[test]
	fn endpoints_are_cached_per_credential() {
		let catalog = ServiceCatalog::new(vec![CatalogEntry {
			service_type: "image".into(),
			name: "glance".into(),
			id: String::new(),
			endpoints: vec![CatalogEndpoint {
				id: String::new(),
				interface: Interface::Public,
				region: "RegionOne".into(),
				region_id: String::new(),
				url: "https://glance.example.com".into(),
			}],
		}]);
		let credential = Credential::new("tok").with_catalog(catalog);
		let opts = EndpointOpts::new("image");
		let first = credential.endpoint(&opts).expect("Image endpoint should resolve.");
		let second = credential.endpoint(&opts).expect("Cached image endpoint should resolve.");

		assert_eq!(first, second);
		assert_eq!(first.as_str(), "https://glance.example.com/");
		assert_eq!(credential.endpoints.lock().len(), 1);
		assert!(!format!("{credential:?}").contains("tok\""));
	}
}
