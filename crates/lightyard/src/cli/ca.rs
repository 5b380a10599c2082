//! the `ca` subcommand - manage the certificate hierarchy

use std::path::PathBuf;

use clap::{Args, Subcommand};
use color_eyre::eyre::{Context, Result};
use lightyard_ca::{CertificateAuthority, IdentityPath};

use super::load_config_file;

/// manage the certificate hierarchy
#[derive(Subcommand, Debug)]
pub enum CaCommand {
    /// create the root, /users and /services cas
    Init(CaArgs),

    /// issue a ca or leaf certificate for a path
    Issue(IssueArgs),
}

/// where the hierarchy lives
#[derive(Args, Debug)]
pub struct CaArgs {
    /// path to config file (toml format)
    #[arg(short, long, env = "LIGHTYARD_CONFIG")]
    config: Option<PathBuf>,

    /// certificate hierarchy root (overrides the config file)
    #[arg(long, env = "LIGHTYARD_CERT_ROOT")]
    cert_root: Option<PathBuf>,
}

/// issue a certificate
#[derive(Args, Debug)]
pub struct IssueArgs {
    #[command(flatten)]
    authority: CaArgs,

    /// identity path, e.g. /services/backup
    path: String,

    /// issue an intermediate ca instead of a leaf
    #[arg(long = "ca", default_value_t = false)]
    as_ca: bool,
}

impl CaArgs {
    fn authority(&self) -> Result<CertificateAuthority> {
        let root = match &self.cert_root {
            Some(root) => root.clone(),
            None => {
                load_config_file(self.config.as_ref())?
                    .unwrap_or_default()
                    .cert_root
            }
        };
        Ok(CertificateAuthority::new(root))
    }
}

impl CaCommand {
    /// run the ca command
    pub async fn run(self) -> Result<()> {
        match self {
            CaCommand::Init(args) => {
                let ca = args.authority()?;
                ca.ensure_hierarchy()
                    .with_context(|| format!("failed to initialize {:?}", ca.root()))?;
                for path in ["/", "/users", "/services"] {
                    print_files(&ca, &IdentityPath::parse(path)?);
                }
                Ok(())
            }
            CaCommand::Issue(args) => {
                let ca = args.authority.authority()?;
                let path = IdentityPath::parse(&args.path)?;
                let identity = if args.as_ca {
                    ca.create_ca(&path)
                } else {
                    ca.issue_leaf(&path)
                }
                .with_context(|| format!("failed to issue {path}"))?;
                print_files(&ca, &identity.path);
                Ok(())
            }
        }
    }
}

fn print_files(ca: &CertificateAuthority, path: &IdentityPath) {
    let files = ca.files(path);
    println!("{path}");
    println!("  certificate: {}", files.cert.display());
    println!("  private key: {}", files.key.display());
    println!("  chain:       {}", files.chain.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(root: &std::path::Path) -> CaArgs {
        CaArgs {
            config: None,
            cert_root: Some(root.to_path_buf()),
        }
    }

    #[tokio::test]
    async fn test_init_then_issue() {
        let dir = tempfile::tempdir().unwrap();
        CaCommand::Init(args(dir.path())).run().await.unwrap();
        assert!(dir.path().join("ca.pem").exists());
        assert!(dir.path().join("users.crt").exists());

        CaCommand::Issue(IssueArgs {
            authority: args(dir.path()),
            path: "/services/backup".to_string(),
            as_ca: false,
        })
        .run()
        .await
        .unwrap();
        assert!(dir.path().join("services/backup.crt").exists());
        assert!(dir.path().join("services/backup-key.pem").exists());
    }

    #[tokio::test]
    async fn test_issue_rejects_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = CaCommand::Issue(IssueArgs {
            authority: args(dir.path()),
            path: "services/../etc".to_string(),
            as_ca: true,
        })
        .run()
        .await;
        assert!(result.is_err());
    }
}
