//! Shared test helpers

use std::fs;

use tempfile::NamedTempFile;

/// Generate a valid self-signed certificate for the given names and write
/// it as PEM files. The returned handles delete the files on drop, so keep
/// them alive for the duration of the test.
pub fn create_valid_test_cert(
    names: &[&str],
) -> Result<(NamedTempFile, NamedTempFile), Box<dyn std::error::Error + Send + Sync>> {
    let subject_alt_names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(subject_alt_names)?;

    let cert_file = NamedTempFile::new()?;
    let key_file = NamedTempFile::new()?;
    fs::write(cert_file.path(), cert.pem())?;
    fs::write(key_file.path(), signing_key.serialize_pem())?;

    Ok((cert_file, key_file))
}
