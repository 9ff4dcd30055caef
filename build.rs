//! Build script for nfsync
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! used by `nfsync --version`.

fn main() {
    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
