//! Minimal native viewer: resolves a reference passed on the command line
//! (or a bundled sample path) and displays it.
//!
//! ```sh
//! cargo run --example viewer -- https://models.provider.ai/v1/generations/abc.glb
//! ```

use modelview::resolve::{AssetReference, ResolverConfig};

fn main() -> anyhow::Result<()> {
    let reference = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample.obj".to_string());

    let mut config = ResolverConfig::new(
        std::env::args()
            .nth(2)
            .unwrap_or_else(|| "http://localhost:3000/proxy".to_string()),
    );
    config.provider_hosts = vec!["models.provider.ai".to_string()];

    modelview::viewer::run(config, Some(AssetReference::new(reference)))
}
