//! Reserved marker slots.
//!
//! Any binary that links this runtime carries a pristine version slot and
//! package slot in its image, which is what makes it usable as a patchable
//! host. The packer locates these regions by scanning for their marker
//! prefixes; the scanner side assembles the marker bytes at runtime so the
//! only contiguous occurrences in a compiled binary are these slots.

/// Version slot: 14-byte marker prefix plus the 42-byte token body.
#[used]
pub static VERSION_SLOT: [u8; 56] =
    *b"c@rton.version__________________________________________";

/// Package slot: replaced with the package signature when patched.
#[used]
pub static PACKAGE_SLOT: [u8; 24] = *b"carton.pack(?@@_________";

/// Whether the running executable has been stamped as a package.
pub fn current_exe_is_package() -> std::io::Result<bool> {
    let image = std::fs::read(std::env::current_exe()?)?;
    Ok(carton_pack::patch::is_native_package(&image))
}
