//! Response classification and field parsing.
//!
//! A completed line is classified by its prefix into a typed [`Response`];
//! checks are mutually exclusive and the first match wins. Two tokenizer
//! shapes cover every reply: [`single_value`] for `+NAME: <integer>` and
//! [`all_values`] for `+NAME: <rest>` whose payload splits on commas (or on
//! `","` for the quoted `+CMGR:` header fields).

use chrono::NaiveDateTime;

use crate::types::GpsFix;

/// A classified modem reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Acknowledgement line; releases the command lock.
    Ok,
    /// Bare `ERROR` with no code.
    GenericError,
    /// `+CME ERROR: <code>` — mobile equipment error.
    CmeError(u32),
    /// `+CMS ERROR: <code>` — message service error.
    CmsError(u32),
    /// `+CPMS:` — mailbox used count and capacity.
    MailboxStatus { used: u32, capacity: u32 },
    /// `+CMGR:` header; an SMS body capture follows.
    SmsHeader {
        sender: String,
        date: Option<NaiveDateTime>,
    },
    /// `+SAPBR:` — bearer status with its IP address.
    BearerStatus { ip: String, ready: bool },
    /// `+HTTPREAD:` header; an HTTP body capture follows.
    HttpReadStart,
    /// `+HTTPACTION:` — method, HTTP status and body length.
    HttpAction { method: u32, status: u32, length: u32 },
    /// `+CMTI:` — unsolicited new-SMS notice.
    NewSmsNotice { storage: String, index: u32 },
    /// `+CGNSINF:` — a parsed GNSS record.
    GnssReport(GpsFix),
    /// Anything the engine does not model.
    Unrecognized,
}

/// Classifies a completed line.
#[must_use]
pub fn classify(line: &str) -> Response {
    if line.contains("+CME ERROR:") {
        return single_value(line).map_or(Response::Unrecognized, Response::CmeError);
    }
    if line.contains("+CMS ERROR:") {
        return single_value(line).map_or(Response::Unrecognized, Response::CmsError);
    }
    if line.contains("OK") {
        return Response::Ok;
    }
    if line.contains("ERROR") {
        return Response::GenericError;
    }
    if line.contains("+CPMS:") {
        return parse_mailbox_status(line);
    }
    if line.contains("+CMGR:") {
        return parse_sms_header(line);
    }
    if line.contains("+SAPBR:") {
        return parse_bearer_status(line);
    }
    if line.contains("+HTTPREAD:") {
        return Response::HttpReadStart;
    }
    if line.contains("+HTTPACTION:") {
        return parse_http_action(line);
    }
    if line.contains("+CMTI:") {
        return parse_new_sms_notice(line);
    }
    if line.contains("+CGNSINF:") {
        return parse_gnss_report(line);
    }
    Response::Unrecognized
}

/// Extracts the integer from a `+NAME: <integer>` line.
fn single_value(line: &str) -> Option<u32> {
    let (_, rest) = line.split_once(':')?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Extracts the payload of a `+NAME: <rest>` line.
fn all_values(line: &str) -> Option<&str> {
    line.split_once(": ").map(|(_, rest)| rest)
}

fn parse_mailbox_status(line: &str) -> Response {
    let Some(rest) = all_values(line) else {
        return Response::Unrecognized;
    };
    let mut fields = rest.split(',');
    let used = fields.next().and_then(|f| f.trim().parse().ok());
    let capacity = fields.next().and_then(|f| f.trim().parse().ok());
    match (used, capacity) {
        (Some(used), Some(capacity)) => Response::MailboxStatus { used, capacity },
        _ => {
            tracing::warn!("malformed +CPMS reply: {line:?}");
            Response::Unrecognized
        }
    }
}

fn parse_sms_header(line: &str) -> Response {
    let Some(rest) = all_values(line) else {
        return Response::Unrecognized;
    };
    // Header shape: "REC UNREAD","+491234","","20/11/15,14:26:32+04"
    let fields: Vec<&str> = rest.split("\",\"").collect();
    let sender = fields.get(1).copied().unwrap_or_default().to_owned();
    let date = fields
        .get(3)
        .map(|raw| raw.replace('"', ""))
        .and_then(|raw| parse_sms_date(&raw));
    Response::SmsHeader { sender, date }
}

/// Parses a `yy/MM/dd,HH:mm:ss+zz` service-center timestamp; the 3-char zone
/// suffix is dropped before parsing.
fn parse_sms_date(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.get(..raw.len().saturating_sub(3))?;
    match NaiveDateTime::parse_from_str(trimmed, "%y/%m/%d,%H:%M:%S") {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::warn!("could not parse SMS timestamp {raw:?}: {e}");
            None
        }
    }
}

fn parse_bearer_status(line: &str) -> Response {
    let Some(rest) = all_values(line) else {
        return Response::Unrecognized;
    };
    // Reply shape: 1,3,"0.0.0.0"
    let Some(ip) = rest.split(',').nth(2) else {
        tracing::warn!("malformed +SAPBR reply: {line:?}");
        return Response::Unrecognized;
    };
    let ip = ip.replace('"', "");
    let ready = ip != "0.0.0.0";
    Response::BearerStatus { ip, ready }
}

fn parse_http_action(line: &str) -> Response {
    let Some(rest) = all_values(line) else {
        return Response::Unrecognized;
    };
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 3 {
        tracing::warn!("unexpected +HTTPACTION reply: {rest:?}");
        return Response::Unrecognized;
    }
    let parsed: Vec<Option<u32>> = fields.iter().map(|f| f.trim().parse().ok()).collect();
    match (parsed[0], parsed[1], parsed[2]) {
        (Some(method), Some(status), Some(length)) => Response::HttpAction {
            method,
            status,
            length,
        },
        _ => {
            tracing::warn!("unexpected +HTTPACTION reply: {rest:?}");
            Response::Unrecognized
        }
    }
}

fn parse_new_sms_notice(line: &str) -> Response {
    let Some(rest) = all_values(line) else {
        return Response::Unrecognized;
    };
    let mut fields = rest.split(',');
    let storage = fields.next().unwrap_or_default().replace('"', "");
    let Some(index) = fields.next().and_then(|f| f.trim().parse().ok()) else {
        tracing::warn!("malformed +CMTI notice: {line:?}");
        return Response::Unrecognized;
    };
    Response::NewSmsNotice { storage, index }
}

/// Parses one numeric GNSS field, falling back to the zero default.
fn gnss_field<T>(raw: &str, name: &str) -> T
where
    T: std::str::FromStr + Default,
{
    raw.parse().unwrap_or_else(|_| {
        tracing::debug!("{name}: could not parse {raw:?}");
        T::default()
    })
}

/// Parses a `yyyyMMddHHmmss.sss` GNSS UTC stamp; the fractional part is
/// dropped before parsing.
fn parse_gnss_utc(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.get(..raw.len().saturating_sub(4))?;
    match NaiveDateTime::parse_from_str(trimmed, "%Y%m%d%H%M%S") {
        Ok(utc) => Some(utc),
        Err(_) => {
            tracing::debug!("utc: could not parse {raw:?}");
            None
        }
    }
}

fn parse_gnss_report(line: &str) -> Response {
    let Some(rest) = all_values(line) else {
        return Response::Unrecognized;
    };
    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 21 {
        tracing::warn!("+CGNSINF with {} fields, expected 21", fields.len());
        return Response::Unrecognized;
    }

    // Every field parses independently; one corrupt field keeps its zero
    // default without discarding the record.
    let fix = GpsFix {
        gnss_status: gnss_field(fields[0], "gnss_status"),
        fix_status: gnss_field(fields[1], "fix_status"),
        utc: parse_gnss_utc(fields[2]),
        latitude: gnss_field(fields[3], "latitude"),
        longitude: gnss_field(fields[4], "longitude"),
        altitude: gnss_field(fields[5], "altitude"),
        speed: gnss_field(fields[6], "speed"),
        course: gnss_field(fields[7], "course"),
        hdop: gnss_field(fields[10], "hdop"),
        pdop: gnss_field(fields[11], "pdop"),
        vdop: gnss_field(fields[12], "vdop"),
        gps_satellites: gnss_field(fields[14], "gps_satellites"),
        gnss_satellites: gnss_field(fields[15], "gnss_satellites"),
        signal: gnss_field::<f64>(fields[18], "signal") / 55.0,
    };
    Response::GnssReport(fix)
}
