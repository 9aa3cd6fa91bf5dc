//! AT commands understood by the engine.
//!
//! Only the command set needed for the SMS, voice call, GNSS and GPRS/HTTP
//! workflows is modeled. Rendering matches the SIM868 vendor syntax byte for
//! byte; the command channel appends the terminating LF uniformly.

use std::fmt;

/// Ctrl-Z byte terminating an SMS submission body.
pub const SMS_TERMINATOR: u8 = 0x1A;

/// An AT command ready to be rendered onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `AT+CMGF=1` — select SMS text mode.
    SetSmsTextMode,
    /// `AT+CPMS="SM"` — select SIM storage and report used/capacity counts.
    QueryMailbox,
    /// `AT+CMGR=<index>` — read the message at a mailbox index.
    ReadSms(u32),
    /// `AT+CMGD=<index>` — delete the message at a mailbox index.
    DeleteSms(u32),
    /// `AT+CMGS="<receiver>"` followed by the body and Ctrl-Z.
    SendSms { receiver: String, body: String },
    /// `ATD<number>;` — place a voice call.
    Dial(String),
    /// `AT+CHUP` — hang up.
    HangUp,
    /// `AT+CGNSPWR=<0|1>` — GNSS power.
    GnssPower(bool),
    /// `AT+CGNSTST=<0|1>` — GNSS NMEA streaming to the serial port.
    GnssStream(bool),
    /// `AT+CGNSINF` — single-shot GNSS report.
    GnssInfo,
    /// `AT+SAPBR=2,1` — query bearer status.
    BearerQuery,
    /// `AT+SAPBR=3,1,"<key>","<value>"` — set a bearer parameter.
    BearerParam { key: &'static str, value: String },
    /// `AT+SAPBR=1,1` — open the bearer.
    BearerOpen,
    /// `AT+HTTPINIT` — initialize the HTTP subsystem.
    HttpInit,
    /// `AT+HTTPPARA="CID",1` — bind HTTP to bearer profile 1.
    HttpCid,
    /// `AT+HTTPPARA="URL","<url>"` — set the request URL.
    HttpUrl(String),
    /// `AT+HTTPACTION=0` — fire a GET request.
    HttpGet,
    /// `AT+HTTPREAD` — read the response body.
    HttpRead,
    /// `AT+HTTPTERM` — terminate the HTTP session.
    HttpTerm,
    /// Bare `AT` liveness ping.
    Ping,
}

impl Command {
    /// Bearer parameter command for the connection type.
    #[must_use]
    pub fn bearer_contype() -> Self {
        Self::BearerParam {
            key: "Contype",
            value: "GPRS".into(),
        }
    }

    /// Bearer parameter command for the APN.
    #[must_use]
    pub fn bearer_apn(apn: impl Into<String>) -> Self {
        Self::BearerParam {
            key: "APN",
            value: apn.into(),
        }
    }

    /// Bearer parameter command for the username.
    #[must_use]
    pub fn bearer_user(user: impl Into<String>) -> Self {
        Self::BearerParam {
            key: "USER",
            value: user.into(),
        }
    }

    /// Bearer parameter command for the password.
    #[must_use]
    pub fn bearer_password(password: impl Into<String>) -> Self {
        Self::BearerParam {
            key: "PWD",
            value: password.into(),
        }
    }

    /// Renders the command text, without the terminating LF.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::SetSmsTextMode => "AT+CMGF=1".into(),
            Self::QueryMailbox => "AT+CPMS=\"SM\"".into(),
            Self::ReadSms(index) => format!("AT+CMGR={index}"),
            Self::DeleteSms(index) => format!("AT+CMGD={index}"),
            Self::SendSms { receiver, body } => {
                format!("AT+CMGS=\"{receiver}\"\n{body}\x1A")
            }
            Self::Dial(number) => format!("ATD{number};"),
            Self::HangUp => "AT+CHUP".into(),
            Self::GnssPower(on) => format!("AT+CGNSPWR={}", u8::from(*on)),
            Self::GnssStream(on) => format!("AT+CGNSTST={}", u8::from(*on)),
            Self::GnssInfo => "AT+CGNSINF".into(),
            Self::BearerQuery => "AT+SAPBR=2,1".into(),
            Self::BearerParam { key, value } => {
                format!("AT+SAPBR=3,1,\"{key}\",\"{value}\"")
            }
            Self::BearerOpen => "AT+SAPBR=1,1".into(),
            Self::HttpInit => "AT+HTTPINIT".into(),
            Self::HttpCid => "AT+HTTPPARA=\"CID\",1".into(),
            Self::HttpUrl(url) => format!("AT+HTTPPARA=\"URL\",\"{url}\""),
            Self::HttpGet => "AT+HTTPACTION=0".into(),
            Self::HttpRead => "AT+HTTPREAD".into(),
            Self::HttpTerm => "AT+HTTPTERM".into(),
            Self::Ping => "AT".into(),
        }
    }

    /// Renders the full wire form: command text plus terminating LF.
    #[must_use]
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = self.text().into_bytes();
        bytes.push(b'\n');
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
