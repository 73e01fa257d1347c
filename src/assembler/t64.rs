// src/assembler/t64.rs

//! `t64:Provides` for libraries renamed by the 64-bit `time_t` transition

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::package::BinaryPackage;
use crate::substvars::{SubstvarOp, Substvars};

pub const T64_PROVIDES: &str = "t64:Provides";

static T64_PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lib.*t64(?:-nss)?$").unwrap());

/// Name the package had before the transition, if it took part in it
///
/// `X-Time64-Compat` overrides the name derived by dropping the first `t64`.
pub fn compat_name(package: &BinaryPackage) -> Result<Option<String>> {
    if let Some(explicit) = package.fields().get("X-Time64-Compat") {
        return Ok(Some(explicit.to_string()));
    }
    let name = package.name();
    if !T64_PACKAGE_RE.is_match(name) {
        return Ok(None);
    }
    let compat = name.replacen("t64", "", 1);
    if compat == name {
        return Err(Error::PolicyConflict(format!(
            "Failed to derive a t64 compat name for {}. Provide an explicit \
             X-Time64-Compat field in debian/control instead.",
            name
        )));
    }
    Ok(Some(compat))
}

/// Add the compat `Provides` to the substvars when relevant
///
/// Only shared libraries (a `symbols` or `shlibs` control file) take part.
/// On 32-bit architectures with time64 enabled the ABI really changed, so only
/// an empty placeholder is defined there.
pub fn apply_t64_provides(
    package: &BinaryPackage,
    control_dir: &Path,
    substvars: &mut Substvars,
    time64_enabled: impl FnOnce() -> bool,
) -> Result<()> {
    let Some(compat) = compat_name(package)? else {
        return Ok(());
    };
    if !["symbols", "shlibs"]
        .iter()
        .any(|name| control_dir.join(name).is_file())
    {
        return Ok(());
    }

    let arch_bits = package.arch_variable("ARCH_BITS")?;
    if arch_bits != "32" || !time64_enabled() {
        debug!("{} provides {} for the t64 transition", package.name(), compat);
        substvars.add_dependency(T64_PROVIDES, &format!("{} (= ${{binary:Version}})", compat));
    } else if !substvars.contains(T64_PROVIDES) {
        substvars.set(T64_PROVIDES, "", SubstvarOp::Merge);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deb822::Stanza;
    use crate::package::ArchTable;
    use std::fs;
    use tempfile::TempDir;

    fn package(name: &str, bits: &str) -> BinaryPackage {
        BinaryPackage::new(
            Stanza::new().with("Package", name).with("Architecture", "any"),
            ArchTable::native("armhf", bits, "arm-linux-gnueabihf"),
        )
        .unwrap()
    }

    fn control_with_shlibs() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("shlibs"), "libfoo 1 libfoot64\n").unwrap();
        dir
    }

    #[test]
    fn test_compat_name() {
        assert_eq!(
            compat_name(&package("libfoot64", "64")).unwrap().as_deref(),
            Some("libfoo")
        );
        assert_eq!(
            compat_name(&package("libnss-foot64-nss", "64")).unwrap().as_deref(),
            Some("libnss-foo-nss")
        );
        assert_eq!(compat_name(&package("foo", "64")).unwrap(), None);
        assert_eq!(compat_name(&package("libfoo1", "64")).unwrap(), None);

        let explicit = BinaryPackage::new(
            Stanza::new()
                .with("Package", "libbar2")
                .with("Architecture", "any")
                .with("X-Time64-Compat", "libbar1"),
            ArchTable::default(),
        )
        .unwrap();
        assert_eq!(compat_name(&explicit).unwrap().as_deref(), Some("libbar1"));
    }

    #[test]
    fn test_provides_on_64bit() {
        let control = control_with_shlibs();
        let mut substvars = Substvars::new();
        apply_t64_provides(&package("libfoot64", "64"), control.path(), &mut substvars, || {
            panic!("time64 state is irrelevant on 64-bit")
        })
        .unwrap();
        assert_eq!(
            substvars.get(T64_PROVIDES).unwrap().value,
            "libfoo (= ${binary:Version})"
        );
    }

    #[test]
    fn test_placeholder_on_32bit_time64() {
        let control = control_with_shlibs();
        let mut substvars = Substvars::new();
        apply_t64_provides(&package("libfoot64", "32"), control.path(), &mut substvars, || true)
            .unwrap();
        assert_eq!(substvars.get(T64_PROVIDES).unwrap().value, "");

        let mut substvars = Substvars::new();
        apply_t64_provides(&package("libfoot64", "32"), control.path(), &mut substvars, || false)
            .unwrap();
        assert_eq!(
            substvars.get(T64_PROVIDES).unwrap().value,
            "libfoo (= ${binary:Version})"
        );
    }

    #[test]
    fn test_requires_shared_library_metadata() {
        let control = TempDir::new().unwrap();
        let mut substvars = Substvars::new();
        apply_t64_provides(&package("libfoot64", "64"), control.path(), &mut substvars, || true)
            .unwrap();
        assert!(!substvars.contains(T64_PROVIDES));
    }
}
