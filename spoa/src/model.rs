use std::net::IpAddr;

use bytes::Bytes;
use spop::{Message, Typed};

fn str_arg(value: &Typed) -> Option<String> {
    match value {
        Typed::String(s) => Some(s.clone()),
        Typed::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

fn bytes_arg(value: &Typed) -> Option<Bytes> {
    match value {
        Typed::Binary(b) => Some(b.clone()),
        Typed::String(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
        _ => None,
    }
}

fn int_arg(value: &Typed) -> Option<i64> {
    match *value {
        Typed::Int32(n) => Some(n as i64),
        Typed::Uint32(n) => Some(n as i64),
        Typed::Int64(n) => Some(n),
        Typed::Uint64(n) => Some(n as i64),
        _ => None,
    }
}

fn ip_arg(value: &Typed) -> Option<IpAddr> {
    match *value {
        Typed::Ipv4(addr) => Some(IpAddr::V4(addr)),
        Typed::Ipv6(addr) => Some(IpAddr::V6(addr)),
        _ => None,
    }
}

/// The `client-request` message, as reassembled from a NOTIFY frame's KV list.
///
/// Mirrors the `client_ip_*`/`path`/`headers`/`body` arguments the HAProxy
/// side sends; an unrecognized KV name is logged and dropped rather than
/// rejected, since new proxy versions may add arguments this agent doesn't
/// know about yet.
#[derive(Clone, Debug, Default)]
pub struct ApplicationRequest {
    pub id: String,
    pub src_ip: Option<IpAddr>,
    pub src_port: i64,
    pub dst_ip: Option<IpAddr>,
    pub dst_port: i64,
    pub method: String,
    pub path: Bytes,
    pub query: Option<Bytes>,
    pub version: String,
    pub headers: Bytes,
    pub body: Bytes,
}

impl ApplicationRequest {
    pub fn from_message(msg: &Message) -> Self {
        let mut req = ApplicationRequest::default();

        for (name, value) in &msg.args {
            match name.as_str() {
                "src-ip" => req.src_ip = ip_arg(value),
                "src-port" => req.src_port = int_arg(value).unwrap_or_default(),
                "dst-ip" => req.dst_ip = ip_arg(value),
                "dst-port" => req.dst_port = int_arg(value).unwrap_or_default(),
                "method" => req.method = str_arg(value).unwrap_or_default(),
                "path" => req.path = bytes_arg(value).unwrap_or_default(),
                "query" => req.query = bytes_arg(value),
                "version" => req.version = str_arg(value).unwrap_or_default(),
                "headers" => req.headers = bytes_arg(value).unwrap_or_default(),
                "body" => req.body = bytes_arg(value).unwrap_or_default(),
                "id" => req.id = str_arg(value).unwrap_or_default(),
                name => debug!(name, "unknown kv entry"),
            }
        }

        req
    }

    /// The request target, `path` and (if present) `?query` concatenated.
    pub fn url(&self) -> Vec<u8> {
        let mut url = self.path.to_vec();

        if let Some(ref query) = self.query {
            url.push(b'?');
            url.extend_from_slice(query);
        }

        url
    }

    /// A synthetic HTTP/1.x request line + headers (+ body), used for the
    /// firewall log's free-form `request` field.
    pub fn request_line(&self) -> String {
        let url = self.url();
        let mut s = String::with_capacity(
            self.method.len() + 1 + url.len() + self.version.len() + 7 + self.headers.len(),
        );

        s.push_str(&self.method);
        s.push(' ');
        s.push_str(&String::from_utf8_lossy(&url));
        s.push_str(" HTTP/");
        s.push_str(&self.version);
        s.push('\n');
        s.push_str(&String::from_utf8_lossy(&self.headers));

        if !self.body.is_empty() {
            s.push('\n');
            s.push_str(&String::from_utf8_lossy(&self.body));
        }

        s
    }
}

/// The `http-response` message, reassembled the same way as
/// [`ApplicationRequest`].
#[derive(Clone, Debug, Default)]
pub struct ApplicationResponse {
    pub id: String,
    pub version: String,
    pub status: i64,
    pub headers: Bytes,
    pub body: Bytes,
}

impl ApplicationResponse {
    pub fn from_message(msg: &Message) -> Self {
        let mut res = ApplicationResponse::default();

        for (name, value) in &msg.args {
            match name.as_str() {
                "id" => res.id = str_arg(value).unwrap_or_default(),
                "version" => res.version = str_arg(value).unwrap_or_default(),
                "status" => res.status = int_arg(value).unwrap_or_default(),
                "headers" => res.headers = bytes_arg(value).unwrap_or_default(),
                "body" => res.body = bytes_arg(value).unwrap_or_default(),
                name => debug!(name, "unknown kv entry"),
            }
        }

        res
    }
}

/// Splits a raw `\n`-separated, `key: value` header block.
///
/// Literal port of the agent's own header scanner: blank lines are skipped,
/// a line without a `:` is an error.
pub fn for_each_header<F>(headers: &[u8], mut f: F) -> Result<(), String>
where
    F: FnMut(&str, &str),
{
    for line in headers.split(|&b| b == b'\n') {
        let line = trim(line);

        if line.is_empty() {
            continue;
        }

        let pos = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| format!("invalid header: {:?}", String::from_utf8_lossy(line)))?;

        let key = trim(&line[..pos]);
        let value = trim(&line[pos + 1..]);

        f(&String::from_utf8_lossy(key), &String::from_utf8_lossy(value));
    }

    Ok(())
}

/// The first value of a header, case-insensitively matched by name.
pub fn header_value(headers: &[u8], target: &str) -> Option<String> {
    let mut found = None;

    let _ = for_each_header(headers, |key, value| {
        if found.is_none() && key.eq_ignore_ascii_case(target) && !value.is_empty() {
            found = Some(value.to_string());
        }
    });

    found
}

fn trim(buf: &[u8]) -> &[u8] {
    let start = buf.iter().position(|&b| !b.is_ascii_whitespace());
    let end = buf.iter().rposition(|&b| !b.is_ascii_whitespace());

    match (start, end) {
        (Some(start), Some(end)) => &buf[start..=end],
        _ => &[],
    }
}
