//! Root CA download and trust-bundle provisioning.

pub mod bundle;
pub mod fetch;
pub mod provisioner;

pub use bundle::{BundleOwner, CertificateBundle};
pub use fetch::{CertSource, HttpCertSource};
pub use provisioner::{CertificateProvisioner, TrustOutcome};

use devboot_core::config::env_keys::exported;

use crate::effects::EnvironmentEffects;

/// The two variables pointing TLS clients at `bundle`.
pub fn trust_effects(bundle: &std::path::Path) -> EnvironmentEffects {
    let value = bundle.to_string_lossy().to_string();
    let mut effects = EnvironmentEffects::new();
    effects.set(exported::REQUESTS_CA_BUNDLE, value.clone());
    effects.set(exported::NODE_EXTRA_CA_CERTS, value);
    effects
}
