//! ---
//! nest_section: "01-core-functionality"
//! nest_subsection: "binary"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Build metadata for the nest-fly launcher."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Source tarballs have no git metadata; vergen then emits placeholders.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
