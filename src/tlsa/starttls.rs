//! Plaintext preambles that upgrade a mail protocol connection to TLS.
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::StarttlsProtocol;
use crate::error::ProbeError;

/// Longest protocol line accepted before giving up on a peer.
const MAX_LINE: usize = 4096;

/// Tag for the IMAP STARTTLS command.
const IMAP_TAG: &str = "a001";

/// Run the protocol's STARTTLS exchange on `stream`. On success the next
/// byte the server sends is the first byte of its TLS handshake.
pub async fn negotiate<S>(
    stream: &mut S,
    protocol: StarttlsProtocol,
    client_name: &str,
) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Conn {
        reader: BufReader::new(stream),
        protocol,
    };

    match protocol {
        StarttlsProtocol::Smtp => smtp(&mut conn, client_name).await?,
        StarttlsProtocol::Pop3 => pop3(&mut conn).await?,
        StarttlsProtocol::Imap => imap(&mut conn).await?,
        StarttlsProtocol::Sieve => sieve(&mut conn).await?,
    }

    // Anything buffered now would be lost to the TLS layer.
    if !conn.reader.buffer().is_empty() {
        return Err(conn.fail("server sent data before the TLS handshake"));
    }
    Ok(())
}

struct Conn<'a, S> {
    reader: BufReader<&'a mut S>,
    protocol: StarttlsProtocol,
}

impl<S> Conn<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn fail(&self, reply: impl Into<String>) -> ProbeError {
        ProbeError::Starttls {
            protocol: self.protocol.as_str(),
            reply: reply.into(),
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), ProbeError> {
        let stream = self.reader.get_mut();
        let written = match stream.write_all(format!("{line}\r\n").as_bytes()).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| self.fail(format!("write failed: {e}")))
    }

    async fn line(&mut self) -> Result<String, ProbeError> {
        let mut buf = String::new();
        let read = {
            let mut limited = (&mut self.reader).take(MAX_LINE as u64);
            limited.read_line(&mut buf).await
        };
        let read = read.map_err(|e| self.fail(format!("read failed: {e}")))?;
        if read == 0 {
            return Err(self.fail("connection closed"));
        }
        if !buf.ends_with('\n') {
            return Err(self.fail("line too long"));
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// A complete, possibly multi-line SMTP reply.
    async fn smtp_reply(&mut self) -> Result<(u16, Vec<String>), ProbeError> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await?;
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| self.fail(line.clone()))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);
            if !more {
                return Ok((code, lines));
            }
        }
    }
}

async fn smtp<S>(conn: &mut Conn<'_, S>, client_name: &str) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (code, greeting) = conn.smtp_reply().await?;
    if code != 220 {
        return Err(conn.fail(greeting.join(" ")));
    }

    conn.send(&format!("EHLO {client_name}")).await?;
    let (code, ehlo) = conn.smtp_reply().await?;
    if code != 250 {
        return Err(conn.fail(ehlo.join(" ")));
    }
    let offered = ehlo
        .iter()
        .any(|l| l.get(4..).is_some_and(|kw| kw.trim().eq_ignore_ascii_case("STARTTLS")));
    if !offered {
        return Err(conn.fail("STARTTLS not offered"));
    }

    conn.send("STARTTLS").await?;
    let (code, reply) = conn.smtp_reply().await?;
    if code != 220 {
        return Err(conn.fail(reply.join(" ")));
    }
    Ok(())
}

async fn pop3<S>(conn: &mut Conn<'_, S>) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = conn.line().await?;
    if !greeting.starts_with("+OK") {
        return Err(conn.fail(greeting));
    }
    conn.send("STLS").await?;
    let reply = conn.line().await?;
    if !reply.starts_with("+OK") {
        return Err(conn.fail(reply));
    }
    Ok(())
}

async fn imap<S>(conn: &mut Conn<'_, S>) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = conn.line().await?;
    if !greeting.to_ascii_uppercase().starts_with("* OK") {
        return Err(conn.fail(greeting));
    }

    conn.send(&format!("{IMAP_TAG} STARTTLS")).await?;
    let tagged = format!("{IMAP_TAG} ");
    loop {
        let line = conn.line().await?;
        if let Some(status) = line.strip_prefix(&tagged) {
            if status.to_ascii_uppercase().starts_with("OK") {
                return Ok(());
            }
            return Err(conn.fail(line));
        }
        // untagged responses (capabilities, alerts) are skipped
    }
}

async fn sieve<S>(conn: &mut Conn<'_, S>) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut offered = false;
    loop {
        let line = conn.line().await?;
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("\"STARTTLS\"") {
            offered = true;
        } else if upper.starts_with("OK") {
            break;
        } else if upper.starts_with("NO") || upper.starts_with("BYE") {
            return Err(conn.fail(line));
        }
    }
    if !offered {
        return Err(conn.fail("STARTTLS not offered"));
    }

    conn.send("STARTTLS").await?;
    let reply = conn.line().await?;
    if !reply.to_ascii_uppercase().starts_with("OK") {
        return Err(conn.fail(reply));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    /// Plays the server side: `(expected client line, server reply)` pairs,
    /// the first reply sent before any client line is read.
    async fn serve(server: DuplexStream, greeting: &str, script: Vec<(&str, &str)>) -> Vec<String> {
        let mut server = BufReader::new(server);
        server.get_mut().write_all(greeting.as_bytes()).await.unwrap();
        let mut seen = Vec::new();
        for (expect, reply) in script {
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            let line = line.trim_end().to_string();
            assert_eq!(line, expect);
            seen.push(line);
            server.get_mut().write_all(reply.as_bytes()).await.unwrap();
        }
        seen
    }

    async fn run(
        protocol: StarttlsProtocol,
        greeting: &'static str,
        script: Vec<(&'static str, &'static str)>,
    ) -> Result<(), ProbeError> {
        let (mut client, server) = duplex(4096);
        let server = tokio::spawn(serve(server, greeting, script));
        let result = negotiate(&mut client, protocol, "localhost").await;
        drop(client);
        let _ = server.await;
        result
    }

    #[tokio::test]
    async fn smtp_upgrade() {
        let result = run(
            StarttlsProtocol::Smtp,
            "220-mail.example.com ESMTP\r\n220 ready\r\n",
            vec![
                (
                    "EHLO localhost",
                    "250-mail.example.com\r\n250-PIPELINING\r\n250-STARTTLS\r\n250 8BITMIME\r\n",
                ),
                ("STARTTLS", "220 2.0.0 Ready to start TLS\r\n"),
            ],
        )
        .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn smtp_without_starttls_fails() {
        let result = run(
            StarttlsProtocol::Smtp,
            "220 mail.example.com ESMTP\r\n",
            vec![("EHLO localhost", "250-mail.example.com\r\n250 SIZE 1000\r\n")],
        )
        .await;
        match result {
            Err(ProbeError::Starttls { protocol, reply }) => {
                assert_eq!(protocol, "smtp");
                assert_eq!(reply, "STARTTLS not offered");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn smtp_rejected_greeting() {
        let result = run(StarttlsProtocol::Smtp, "554 go away\r\n", vec![]).await;
        assert!(matches!(result, Err(ProbeError::Starttls { .. })));
    }

    #[tokio::test]
    async fn pop3_upgrade() {
        let result = run(
            StarttlsProtocol::Pop3,
            "+OK Dovecot ready.\r\n",
            vec![("STLS", "+OK Begin TLS negotiation now.\r\n")],
        )
        .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn pop3_refused() {
        let result = run(
            StarttlsProtocol::Pop3,
            "+OK ready\r\n",
            vec![("STLS", "-ERR TLS not available\r\n")],
        )
        .await;
        match result {
            Err(ProbeError::Starttls { reply, .. }) => assert_eq!(reply, "-ERR TLS not available"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn imap_upgrade_skips_untagged() {
        let result = run(
            StarttlsProtocol::Imap,
            "* OK [CAPABILITY IMAP4rev1 STARTTLS] Dovecot ready.\r\n",
            vec![(
                "a001 STARTTLS",
                "* CAPABILITY IMAP4rev1\r\na001 OK Begin TLS negotiation now.\r\n",
            )],
        )
        .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn imap_tagged_no() {
        let result = run(
            StarttlsProtocol::Imap,
            "* OK ready\r\n",
            vec![("a001 STARTTLS", "a001 NO not now\r\n")],
        )
        .await;
        assert!(matches!(result, Err(ProbeError::Starttls { protocol: "imap", .. })));
    }

    #[tokio::test]
    async fn sieve_upgrade() {
        let result = run(
            StarttlsProtocol::Sieve,
            "\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\"SIEVE\" \"fileinto\"\r\n\"STARTTLS\"\r\n\"VERSION\" \"1.0\"\r\nOK \"ready\"\r\n",
            vec![("STARTTLS", "OK \"Begin TLS negotiation now.\"\r\n")],
        )
        .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn sieve_without_starttls_fails() {
        let result = run(
            StarttlsProtocol::Sieve,
            "\"IMPLEMENTATION\" \"x\"\r\nOK\r\n",
            vec![],
        )
        .await;
        assert!(matches!(result, Err(ProbeError::Starttls { protocol: "sieve", .. })));
    }

    #[tokio::test]
    async fn closed_connection() {
        let result = run(StarttlsProtocol::Pop3, "", vec![]).await;
        match result {
            Err(ProbeError::Starttls { reply, .. }) => assert_eq!(reply, "connection closed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn early_tls_bytes_are_rejected() {
        let result = run(
            StarttlsProtocol::Pop3,
            "+OK ready\r\n",
            vec![("STLS", "+OK go\r\n\x16\x03\x01")],
        )
        .await;
        match result {
            Err(ProbeError::Starttls { reply, .. }) => {
                assert_eq!(reply, "server sent data before the TLS handshake")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
