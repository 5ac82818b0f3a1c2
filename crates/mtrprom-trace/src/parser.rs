use crate::runner::{RawFormat, RawMeasurement};
use mtrprom_model::{HopRecord, ProbeError, RttSummary, UNRESPONSIVE_HOST};
use serde::Deserialize;

/// Tolerance when checking best <= avg <= worst on tool-rounded values.
const ORDER_EPSILON: f64 = 1e-9;

pub fn parse(raw: &RawMeasurement) -> Result<Vec<HopRecord>, ProbeError> {
    match raw.format {
        RawFormat::MtrJson => parse_mtr_json(&raw.text),
        RawFormat::MtrReport => parse_mtr_report(&raw.text),
        RawFormat::Traceroute => parse_traceroute(&raw.text),
    }
}

fn parse_error(message: impl Into<String>) -> ProbeError {
    ProbeError::Parse(message.into())
}

#[derive(Debug, Deserialize)]
struct MtrDocument {
    report: MtrJsonReport,
}

#[derive(Debug, Deserialize)]
struct MtrJsonReport {
    hubs: Vec<MtrHub>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HopIndex {
    Number(u32),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct MtrHub {
    count: HopIndex,
    #[serde(default)]
    host: Option<String>,
    #[serde(rename = "Loss%", default)]
    loss: Option<f64>,
    #[serde(rename = "Snt")]
    sent: u32,
    #[serde(rename = "Rcv", default)]
    received: Option<u32>,
    #[serde(rename = "Last")]
    last: f64,
    #[serde(rename = "Avg")]
    avg: f64,
    #[serde(rename = "Best")]
    best: f64,
    #[serde(rename = "Wrst")]
    worst: f64,
    #[serde(rename = "StDev", default)]
    stddev: f64,
}

/// Parses `mtr --json` output. Older mtr builds print `count` as a string
/// and omit `Rcv`; received packets are then recovered from `Loss%`.
pub fn parse_mtr_json(text: &str) -> Result<Vec<HopRecord>, ProbeError> {
    let document: MtrDocument =
        serde_json::from_str(text).map_err(|err| parse_error(format!("invalid mtr json: {err}")))?;

    let mut hops = Vec::with_capacity(document.report.hubs.len());
    for hub in document.report.hubs {
        let hop = match hub.count {
            HopIndex::Number(value) => value,
            HopIndex::Text(ref value) => value
                .trim()
                .parse()
                .map_err(|_| parse_error(format!("invalid hop number {value:?}")))?,
        };
        let received = match (hub.received, hub.loss) {
            (Some(received), _) => received,
            (None, Some(loss)) => received_from_loss(hop, hub.sent, loss)?,
            (None, None) => {
                return Err(parse_error(format!("hop {hop}: neither Rcv nor Loss% present")))
            }
        };
        let rtt = RttSummary {
            last_ms: number(hop, "Last", hub.last)?,
            avg_ms: number(hop, "Avg", hub.avg)?,
            best_ms: number(hop, "Best", hub.best)?,
            worst_ms: number(hop, "Wrst", hub.worst)?,
            stddev_ms: number(hop, "StDev", hub.stddev)?,
        };
        hops.push(build_hop(hop, hub.host.as_deref(), hub.sent, received, rtt)?);
    }

    validate_sequence(&hops)?;
    Ok(hops)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Column {
    Loss,
    Sent,
    Received,
    Last,
    Avg,
    Best,
    Worst,
    StdDev,
    Other,
}

impl Column {
    fn from_header(name: &str) -> Self {
        match name {
            "Loss%" => Self::Loss,
            "Snt" => Self::Sent,
            "Rcv" => Self::Received,
            "Last" => Self::Last,
            "Avg" => Self::Avg,
            "Best" => Self::Best,
            "Wrst" => Self::Worst,
            "StDev" => Self::StdDev,
            _ => Self::Other,
        }
    }
}

/// Parses `mtr --report` text. Column order comes from the `HOST:` header line.
/// A report without hop lines is truncated output, not an empty path.
pub fn parse_mtr_report(text: &str) -> Result<Vec<HopRecord>, ProbeError> {
    let mut columns: Option<Vec<Column>> = None;
    let mut hops = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Start:") {
            continue;
        }

        if let Some(rest) = line.strip_prefix("HOST:") {
            // first token is the local host name
            let names: Vec<Column> = rest
                .split_whitespace()
                .skip(1)
                .map(Column::from_header)
                .collect();
            if !names.contains(&Column::Sent) {
                return Err(parse_error("report header has no Snt column"));
            }
            columns = Some(names);
            continue;
        }

        // multipath continuation lines
        if line.starts_with('|') {
            continue;
        }

        let columns = columns
            .as_ref()
            .ok_or_else(|| parse_error("hop line before HOST header"))?;
        hops.push(parse_report_line(line, columns)?);
    }

    if columns.is_none() {
        return Err(parse_error("missing HOST header in mtr report"));
    }
    if hops.is_empty() {
        return Err(parse_error("mtr report has no hop lines"));
    }

    validate_sequence(&hops)?;
    Ok(hops)
}

fn parse_report_line(line: &str, columns: &[Column]) -> Result<HopRecord, ProbeError> {
    let (index, rest) = line
        .split_once("|--")
        .ok_or_else(|| parse_error(format!("unrecognized report line: {line}")))?;
    let index = index.trim().trim_end_matches('.');
    let hop: u32 = index
        .parse()
        .map_err(|_| parse_error(format!("invalid hop number {index:?}")))?;

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() <= columns.len() {
        return Err(parse_error(format!("hop {hop}: truncated report line")));
    }
    let split = tokens.len() - columns.len();
    let host = tokens[..split].join(" ");

    let mut loss = None;
    let mut sent = None;
    let mut received = None;
    let mut rtt = RttSummary::default();

    for (column, token) in columns.iter().zip(&tokens[split..]) {
        let value: f64 = token
            .trim_end_matches('%')
            .parse()
            .map_err(|_| parse_error(format!("hop {hop}: invalid value {token:?}")))?;
        let value = number(hop, "report", value)?;
        match column {
            Column::Loss => loss = Some(value),
            Column::Sent => sent = Some(count(hop, "Snt", value)?),
            Column::Received => received = Some(count(hop, "Rcv", value)?),
            Column::Last => rtt.last_ms = value,
            Column::Avg => rtt.avg_ms = value,
            Column::Best => rtt.best_ms = value,
            Column::Worst => rtt.worst_ms = value,
            Column::StdDev => rtt.stddev_ms = value,
            Column::Other => {}
        }
    }

    let sent = sent.ok_or_else(|| parse_error(format!("hop {hop}: missing Snt")))?;
    let received = match (received, loss) {
        (Some(received), _) => received,
        (None, Some(loss)) => received_from_loss(hop, sent, loss)?,
        (None, None) => return Err(parse_error(format!("hop {hop}: neither Rcv nor Loss%"))),
    };

    build_hop(hop, Some(&host), sent, received, rtt)
}

/// Parses `traceroute -n` output into per-packet samples, one hop per TTL.
pub fn parse_traceroute(text: &str) -> Result<Vec<HopRecord>, ProbeError> {
    let mut parsed: Vec<(u32, Option<String>, Vec<Option<f64>>)> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.to_ascii_lowercase().starts_with("traceroute") {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let first_token = match tokens.next() {
            Some(token) => token,
            None => continue,
        };

        if first_token.chars().all(|c| c.is_ascii_digit()) {
            let ttl: u32 = first_token
                .parse()
                .map_err(|_| parse_error(format!("invalid ttl token: {first_token}")))?;
            let rest: Vec<&str> = tokens.collect();
            let mut ip = None;
            let mut rtt_ms = Vec::new();
            append_probe_tokens(ttl, &rest, &mut ip, &mut rtt_ms)?;
            parsed.push((ttl, ip, rtt_ms));
            continue;
        }

        match parsed.last_mut() {
            Some((ttl, ip, rtt_ms)) if is_probe_start(first_token) => {
                let rest: Vec<&str> = std::iter::once(first_token).chain(tokens).collect();
                append_probe_tokens(*ttl, &rest, ip, rtt_ms)?;
            }
            _ => return Err(parse_error(format!("unrecognized traceroute line: {line}"))),
        }
    }

    // traceroute always prints at least the first TTL
    if parsed.is_empty() {
        return Err(parse_error("traceroute output has no hop lines"));
    }

    let mut hops = Vec::with_capacity(parsed.len());
    for (ttl, ip, rtt_ms) in parsed {
        if rtt_ms.is_empty() {
            return Err(parse_error(format!("hop {ttl}: no probe results")));
        }
        let host = ip.unwrap_or_else(|| UNRESPONSIVE_HOST.to_string());
        hops.push(HopRecord::from_samples(ttl, &host, &rtt_ms));
    }

    validate_sequence(&hops)?;
    Ok(hops)
}

fn append_probe_tokens(
    ttl: u32,
    tokens: &[&str],
    ip: &mut Option<String>,
    rtt_ms: &mut Vec<Option<f64>>,
) -> Result<(), ProbeError> {
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];

        if tok == "*" {
            rtt_ms.push(None);
            i += 1;
            continue;
        }

        // ICMP annotations such as !H or !N
        if tok.starts_with('!') {
            i += 1;
            continue;
        }

        if is_ip_token(tok) {
            if ip.is_none() {
                *ip = Some(tok.to_string());
            }
            i += 1;
            continue;
        }

        let next = tokens.get(i + 1).copied();
        if let Some((val, consumed_next)) = parse_rtt(tok, next) {
            rtt_ms.push(Some(number(ttl, "rtt", val)?));
            i += if consumed_next { 2 } else { 1 };
            continue;
        }

        return Err(parse_error(format!("hop {ttl}: unexpected token {tok:?}")));
    }
    Ok(())
}

fn is_probe_start(token: &str) -> bool {
    token == "*" || is_ip_token(token)
}

fn is_ip_token(token: &str) -> bool {
    if token.ends_with("ms") {
        return false;
    }

    is_ipv4(token) || is_ipv6(token)
}

fn is_ipv4(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 4 {
        return false;
    }

    parts.iter().all(|part| {
        !part.is_empty()
            && part.len() <= 3
            && part.chars().all(|c| c.is_ascii_digit())
            && part.parse::<u8>().is_ok()
    })
}

fn is_ipv6(token: &str) -> bool {
    token.contains(':') && token.chars().all(|c| c.is_ascii_hexdigit() || c == ':')
}

fn parse_rtt(token: &str, next: Option<&str>) -> Option<(f64, bool)> {
    if let Some(num) = token.strip_suffix("ms") {
        if let Ok(val) = num.parse::<f64>() {
            return Some((val, false));
        }
    }

    if let Ok(val) = token.parse::<f64>() {
        if matches!(next, Some(next_tok) if next_tok.starts_with("ms")) {
            return Some((val, true));
        }
    }

    None
}

fn number(hop: u32, field: &str, value: f64) -> Result<f64, ProbeError> {
    if !value.is_finite() || value < 0.0 {
        return Err(parse_error(format!("hop {hop}: {field} is not a finite non-negative number")));
    }
    Ok(value)
}

fn count(hop: u32, field: &str, value: f64) -> Result<u32, ProbeError> {
    if value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(parse_error(format!("hop {hop}: {field} is not a packet count")));
    }
    Ok(value as u32)
}

fn received_from_loss(hop: u32, sent: u32, loss: f64) -> Result<u32, ProbeError> {
    let loss = number(hop, "Loss%", loss)?;
    if loss > 100.0 {
        return Err(parse_error(format!("hop {hop}: Loss% above 100")));
    }
    Ok((sent as f64 * (1.0 - loss / 100.0)).round() as u32)
}

fn build_hop(
    hop: u32,
    host: Option<&str>,
    sent: u32,
    received: u32,
    rtt: RttSummary,
) -> Result<HopRecord, ProbeError> {
    if sent == 0 {
        return Err(parse_error(format!("hop {hop}: no packets sent")));
    }
    if received > sent {
        return Err(parse_error(format!(
            "hop {hop}: received {received} exceeds sent {sent}"
        )));
    }

    let host = match host.map(str::trim) {
        None | Some("") | Some("???") => UNRESPONSIVE_HOST,
        Some(host) => host,
    };
    let record = HopRecord::from_summary(hop, host, sent, received, rtt);

    if record.responded() {
        let ordered = record.best_rtt_ms <= record.avg_rtt_ms + ORDER_EPSILON
            && record.avg_rtt_ms <= record.worst_rtt_ms + ORDER_EPSILON
            && record.best_rtt_ms <= record.last_rtt_ms + ORDER_EPSILON
            && record.last_rtt_ms <= record.worst_rtt_ms + ORDER_EPSILON;
        if !ordered {
            return Err(parse_error(format!(
                "hop {hop}: rtt values out of order (best {}, avg {}, worst {}, last {})",
                record.best_rtt_ms, record.avg_rtt_ms, record.worst_rtt_ms, record.last_rtt_ms
            )));
        }
    }

    Ok(record)
}

/// Hop numbers must run 1..=N with no gap and no repeat.
pub fn validate_sequence(hops: &[HopRecord]) -> Result<(), ProbeError> {
    for (index, hop) in hops.iter().enumerate() {
        let expected = index as u32 + 1;
        if hop.hop == expected {
            continue;
        }
        if hop.hop < expected {
            return Err(parse_error(format!("duplicate or out-of-order hop {}", hop.hop)));
        }
        return Err(parse_error(format!(
            "gap in hop sequence: expected hop {expected}, found {}",
            hop.hop
        )));
    }
    Ok(())
}
