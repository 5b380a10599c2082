//! the certificate authority: issues cas, leaves and csr-based certificates.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    PKCS_ECDSA_P256_SHA256,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::{Error, Identity, IdentityFiles, IdentityPath, Result};

/// validity of every issued certificate (87600h).
const VALIDITY: Duration = Duration::days(3650);

/// backdating applied to `not_before` to tolerate clock skew between hosts.
const CLOCK_SKEW: Duration = Duration::hours(1);

/// maximum number of intermediate cas below any ca.
const MAX_PATH_LEN: u8 = 3;

/// signing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    /// ca-capable, path length constrained.
    Inner,
    /// end-entity, no ca bit.
    Leaf,
}

/// how `issue_from_csr` treats the subject and existing files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueMode {
    /// sign for the path named in the csr; an existing leaf is an error.
    Fresh,
    /// sign for the path named in the csr, replacing any existing leaf.
    Recover,
    /// sign for `subject` instead of the csr's placeholder, replacing any
    /// existing leaf.
    Pairing {
        /// the path the paired device is issued under.
        subject: IdentityPath,
    },
}

/// a certificate authority hierarchy mapped onto a directory.
///
/// all operations are synchronous filesystem work; async callers should run
/// them on a blocking thread. concurrent writers to the same path are
/// serialized by a per-path lock, and every file is written to a temporary
/// name and renamed into place, with the chain file last. an identity counts
/// as issued only once its chain file exists.
pub struct CertificateAuthority {
    root: PathBuf,
    locks: Mutex<HashMap<IdentityPath, Arc<Mutex<()>>>>,
}

impl CertificateAuthority {
    /// create an authority rooted at `root`. nothing is generated yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// the certificate root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// files backing `path` below the root.
    pub fn files(&self, path: &IdentityPath) -> IdentityFiles {
        path.files(&self.root)
    }

    /// pem certificate of the root ca.
    pub fn ca_root(&self) -> Result<String> {
        let files = IdentityPath::root().files(&self.root);
        fs::read_to_string(&files.cert).map_err(|e| Error::io(&files.cert, e))
    }

    /// load an already issued identity.
    pub fn identity(&self, path: &IdentityPath) -> Result<Identity> {
        Identity::load(&self.root, path)
    }

    /// create the root, `/users` and `/services` cas if they are missing.
    pub fn ensure_hierarchy(&self) -> Result<()> {
        let root = IdentityPath::root();
        self.create_ca(&root)?;
        self.create_ca(&root.join("users")?)?;
        self.create_ca(&root.join("services")?)?;
        Ok(())
    }

    /// create a ca at `path`.
    ///
    /// the root is self-signed, anything else is signed by the nearest ca
    /// above it. an existing ca is returned unchanged.
    pub fn create_ca(&self, path: &IdentityPath) -> Result<Identity> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let files = path.files(&self.root);
        if files.chain.exists() {
            debug!(path = %path, "ca already exists, not overwriting");
            return Identity::load(&self.root, path);
        }

        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
        let params = profile_params(path, Profile::Inner, vec![])?;

        let (cert_pem, parent_chain) = if path.is_root() {
            (params.self_signed(&key)?.pem(), None)
        } else {
            let parent = self.nearest_ca(path)?;
            let issuer = self.load_issuer(&parent)?;
            let cert = params.signed_by(&key, &issuer)?;
            (cert.pem(), Some(self.read_chain(&parent)?))
        };

        let chain = build_chain(&cert_pem, parent_chain.as_deref());
        write_identity(&files, Some(&key.serialize_pem()), &cert_pem, &chain)?;

        info!(path = %path, "issued certificate authority");
        Identity::load(&self.root, path)
    }

    /// issue a server-generated leaf at `path`, signed by the nearest ca.
    ///
    /// an existing leaf is returned unchanged.
    pub fn issue_leaf(&self, path: &IdentityPath) -> Result<Identity> {
        if path.is_root() {
            return Err(Error::InvalidPath("the root cannot be a leaf".to_string()));
        }
        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let files = path.files(&self.root);
        if files.chain.exists() {
            debug!(path = %path, "leaf already exists, not overwriting");
            return Identity::load(&self.root, path);
        }

        let parent = self.nearest_ca(path)?;
        let issuer = self.load_issuer(&parent)?;
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
        let params = profile_params(path, Profile::Leaf, vec!["localhost".to_string()])?;
        let cert_pem = params.signed_by(&key, &issuer)?.pem();
        let chain = build_chain(&cert_pem, Some(&self.read_chain(&parent)?));

        write_identity(&files, Some(&key.serialize_pem()), &cert_pem, &chain)?;

        info!(path = %path, parent = %parent, "issued leaf certificate");
        Identity::load(&self.root, path)
    }

    /// the common name of a csr.
    pub fn csr_common_name(csr_pem: &str) -> Result<String> {
        let csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| Error::InvalidCsr(e.to_string()))?;
        common_name(&csr.params.distinguished_name)
            .ok_or_else(|| Error::InvalidCsr("missing common name".to_string()))
    }

    /// the path a csr asks to be issued for, taken from its common name.
    pub fn csr_subject(csr_pem: &str) -> Result<IdentityPath> {
        parse_csr_path(&Self::csr_common_name(csr_pem)?)
    }

    /// sign an externally generated csr and return the certificate chain.
    ///
    /// the target path is the csr's common name, or the pairing subject.
    /// the private key stays with the caller, so no key file is written and
    /// any key left from an earlier server-generated leaf is removed.
    pub fn issue_from_csr(&self, csr_pem: &str, mode: IssueMode) -> Result<String> {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| Error::InvalidCsr(e.to_string()))?;

        let requested = common_name(&csr.params.distinguished_name)
            .ok_or_else(|| Error::InvalidCsr("missing common name".to_string()))?;

        let (path, overwrite) = match mode {
            IssueMode::Fresh => (parse_csr_path(&requested)?, false),
            IssueMode::Recover => (parse_csr_path(&requested)?, true),
            IssueMode::Pairing { subject } => {
                debug!(placeholder = %requested, subject = %subject, "rewriting pairing subject");
                (subject, true)
            }
        };
        if path.is_root() {
            return Err(Error::InvalidCsr("the root cannot be signed from a csr".to_string()));
        }

        let lock = self.path_lock(&path);
        let _guard = lock.lock();

        let files = path.files(&self.root);
        if files.chain.exists() && !overwrite {
            return Err(Error::AlreadyIssued(path.to_string()));
        }

        let parent = self.nearest_ca(&path)?;
        let issuer = self.load_issuer(&parent)?;
        apply_profile(&mut csr.params, &path, Profile::Leaf);
        let cert_pem = csr.signed_by(&issuer)?.pem();
        let chain = build_chain(&cert_pem, Some(&self.read_chain(&parent)?));

        if files.key.exists() {
            fs::remove_file(&files.key).map_err(|e| Error::io(&files.key, e))?;
        }
        write_identity(&files, None, &cert_pem, &chain)?;

        info!(path = %path, parent = %parent, ?overwrite, "signed certificate request");
        Ok(chain)
    }

    /// the leaf directly below `parent` whose certificate carries
    /// `public_key` (an sec1 encoded point), if any.
    pub fn find_leaf_by_key(
        &self,
        parent: &IdentityPath,
        public_key: &[u8],
    ) -> Result<Option<IdentityPath>> {
        let dir = parent.segments().fold(self.root.clone(), |dir, s| dir.join(s));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(".pem"))
                .filter(|n| !n.ends_with("-key"))
            else {
                continue;
            };
            let Ok(path) = parent.join(name) else {
                continue;
            };
            let files = path.files(&self.root);
            if !files.chain.exists() {
                continue;
            }
            let (is_ca, key) = cert_key(&files.cert)?;
            if !is_ca && key == public_key {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// walk upward from `path` to the first issued ca.
    fn nearest_ca(&self, path: &IdentityPath) -> Result<IdentityPath> {
        let mut current = path.parent();
        while let Some(candidate) = current {
            let files = candidate.files(&self.root);
            if files.chain.exists() && files.key.exists() && is_ca_cert(&files.cert)? {
                return Ok(candidate);
            }
            current = candidate.parent();
        }
        Err(Error::MissingCa(path.to_string()))
    }

    fn load_issuer(&self, ca: &IdentityPath) -> Result<Issuer<'static, KeyPair>> {
        let files = ca.files(&self.root);
        let key_pem = fs::read_to_string(&files.key).map_err(|e| Error::io(&files.key, e))?;
        let cert_pem = fs::read_to_string(&files.cert).map_err(|e| Error::io(&files.cert, e))?;
        let key = KeyPair::from_pem(&key_pem)?;
        Ok(Issuer::from_ca_cert_pem(&cert_pem, key)?)
    }

    fn read_chain(&self, path: &IdentityPath) -> Result<String> {
        let files = path.files(&self.root);
        fs::read_to_string(&files.chain).map_err(|e| Error::io(&files.chain, e))
    }

    fn path_lock(&self, path: &IdentityPath) -> PathLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(path.clone()).or_default().clone();
        PathLock {
            locks: &self.locks,
            path: path.clone(),
            lock,
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// a handle on the lock for one path. the map entry goes away with the last
/// handle, so the map only holds paths with work in flight.
struct PathLock<'a> {
    locks: &'a Mutex<HashMap<IdentityPath, Arc<Mutex<()>>>>,
    path: IdentityPath,
    lock: Arc<Mutex<()>>,
}

impl PathLock<'_> {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map's reference plus ours
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.path);
        }
    }
}

fn parse_csr_path(cn: &str) -> Result<IdentityPath> {
    IdentityPath::parse(cn).map_err(|e| Error::InvalidCsr(e.to_string()))
}

fn profile_params(
    path: &IdentityPath,
    profile: Profile,
    subject_alt_names: Vec<String>,
) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(subject_alt_names)?;
    apply_profile(&mut params, path, profile);
    Ok(params)
}

fn apply_profile(params: &mut CertificateParams, path: &IdentityPath, profile: Profile) {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "lightyard");
    match profile {
        Profile::Inner => {
            dn.push(DnType::OrganizationalUnitName, "CertificateAuthority");
            dn.push(DnType::CommonName, format!("lightyard {path}"));
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(MAX_PATH_LEN));
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ];
        }
        Profile::Leaf => {
            dn.push(DnType::CommonName, path.as_str());
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
        }
    }
    params.distinguished_name = dn;
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - CLOCK_SKEW;
    params.not_after = now + VALIDITY;
}

fn common_name(dn: &DistinguishedName) -> Option<String> {
    match dn.get(&DnType::CommonName)? {
        DnValue::Utf8String(s) => Some(s.clone()),
        DnValue::PrintableString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn is_ca_cert(cert_path: &Path) -> Result<bool> {
    cert_key(cert_path).map(|(is_ca, _)| is_ca)
}

/// the ca flag and subject public key of a pem certificate.
fn cert_key(cert_path: &Path) -> Result<(bool, Vec<u8>)> {
    let pem_bytes = fs::read(cert_path).map_err(|e| Error::io(cert_path, e))?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(&pem_bytes)
        .map_err(|e| Error::SigningFailure(format!("unreadable certificate {cert_path:?}: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::SigningFailure(format!("unreadable certificate {cert_path:?}: {e}")))?;
    let key = cert.public_key().subject_public_key.data.to_vec();
    Ok((cert.is_ca(), key))
}

fn build_chain(cert_pem: &str, parent_chain: Option<&str>) -> String {
    let mut chain = cert_pem.to_string();
    if !chain.ends_with('\n') {
        chain.push('\n');
    }
    if let Some(parent) = parent_chain {
        chain.push_str(parent);
    }
    chain
}

/// write key, certificate and chain, in that order.
fn write_identity(
    files: &IdentityFiles,
    key_pem: Option<&str>,
    cert_pem: &str,
    chain: &str,
) -> Result<()> {
    if let Some(key_pem) = key_pem {
        write_atomic(&files.key, key_pem)?;
    }
    write_atomic(&files.cert, cert_pem)?;
    write_atomic(&files.chain, chain)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(format!("{path:?} has no parent directory")))?;
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(path, e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
