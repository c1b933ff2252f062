//! Certificate inspection through an external `openssl` binary.
//!
//! Equivalent to
//! `openssl s_client ... | openssl x509 -pubkey -noout | openssl pkey -pubin -outform DER`,
//! with every stage spawned separately and checked.
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{CertificateInspector, ProbeEndpoint, ProbeTarget, TlsMode};
use crate::error::ProbeError;

const PEM_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";

#[derive(Debug, Clone)]
pub struct OpensslInspector {
    program: PathBuf,
}

impl Default for OpensslInspector {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl OpensslInspector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: &[String], input: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let program = self.program.display().to_string();
        let spawn_err = |source| ProbeError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(input).await {
                // the tool may exit without reading its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other.map_err(spawn_err)?,
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        if !output.status.success() {
            return Err(ProbeError::Tool {
                program: format!("{program} {}", args.first().map(String::as_str).unwrap_or("")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Arguments for the `s_client` stage.
pub fn s_client_args(server_name: &str, authority: &str, mode: TlsMode) -> Vec<String> {
    let mut args: Vec<String> = [
        "s_client",
        "-servername",
        server_name,
        "-connect",
        authority,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if let TlsMode::Starttls(protocol) = mode {
        args.push("-starttls".into());
        args.push(protocol.as_str().into());
    }
    args
}

fn stage(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl CertificateInspector for OpensslInspector {
    async fn fetch_spki(
        &self,
        server_name: &str,
        endpoint: &ProbeEndpoint,
        target: &ProbeTarget,
    ) -> Result<Vec<u8>, ProbeError> {
        let authority = endpoint.authority(target.port);
        let args = s_client_args(server_name, &authority, target.mode);
        debug!(program = %self.program.display(), ?args, "running TLS inspection tool");

        let session = self.run(&args, b"").await?;
        if !String::from_utf8_lossy(&session).contains(PEM_CERTIFICATE) {
            return Err(ProbeError::Certificate(format!(
                "no certificate presented on {authority}"
            )));
        }

        let public_key = self
            .run(&stage(&["x509", "-pubkey", "-noout"]), &session)
            .await?;
        let der = self
            .run(&stage(&["pkey", "-pubin", "-outform", "DER"]), &public_key)
            .await?;
        if der.is_empty() {
            return Err(ProbeError::Certificate(
                "tool returned an empty public key".into(),
            ));
        }
        Ok(der)
    }
}
