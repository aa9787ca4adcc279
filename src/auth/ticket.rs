use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::endpoints::Service;

/// Safety margin subtracted from the expiration bound, matching the
/// margin the ticket was requested with. Tolerates clock drift between
/// this host and the AFIP servers.
pub const EXPIRY_SKEW_SECS: i64 = 600;

/// Signed access ticket (TA) issued by the WSAA login service.
///
/// Replaced wholesale on renewal, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub token: String,
    pub sign: String,
    pub generation_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub service: Service,
}

impl Ticket {
    /// Usable only while `now` stays clear of the expiration bound by the
    /// skew margin.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiration_time - Duration::seconds(EXPIRY_SKEW_SECS)
    }

    /// Parse a `loginTicketResponse` document. The same shape comes back
    /// from WSAA and out of the on-disk cache.
    pub fn from_ta_xml(xml: &str, service: Service) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut current = String::new();
        let mut token = None;
        let mut sign = None;
        let mut generation = None;
        let mut expiration = None;

        loop {
            match reader.read_event().context("reading ticket xml")? {
                Event::Start(e) => {
                    current = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                }
                Event::Text(e) => {
                    let text = e.unescape().context("unescaping ticket xml")?.into_owned();
                    match current.as_str() {
                        "token" => token = Some(text),
                        "sign" => sign = Some(text),
                        "generationTime" => generation = Some(parse_time(&text)?),
                        "expirationTime" => expiration = Some(parse_time(&text)?),
                        _ => {}
                    }
                }
                Event::End(_) => current.clear(),
                Event::Eof => break,
                _ => {}
            }
        }

        let ticket = Ticket {
            token: token.ok_or_else(|| anyhow!("ticket xml missing token"))?,
            sign: sign.ok_or_else(|| anyhow!("ticket xml missing sign"))?,
            generation_time: generation.ok_or_else(|| anyhow!("ticket xml missing generationTime"))?,
            expiration_time: expiration.ok_or_else(|| anyhow!("ticket xml missing expirationTime"))?,
            service,
        };
        if ticket.expiration_time <= ticket.generation_time {
            return Err(anyhow!("ticket expires before it was generated"));
        }
        Ok(ticket)
    }

    /// Render back into the `loginTicketResponse` shape used by the cache.
    /// Lossless for token, sign and both timestamps.
    pub fn to_ta_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("loginTicketResponse")))?;
        writer.write_event(Event::Start(BytesStart::new("header")))?;
        write_text_element(&mut writer, "generationTime", &format_time(self.generation_time))?;
        write_text_element(&mut writer, "expirationTime", &format_time(self.expiration_time))?;
        writer.write_event(Event::End(BytesEnd::new("header")))?;
        writer.write_event(Event::Start(BytesStart::new("credentials")))?;
        write_text_element(&mut writer, "token", &self.token)?;
        write_text_element(&mut writer, "sign", &self.sign)?;
        writer.write_event(Event::End(BytesEnd::new("credentials")))?;
        writer.write_event(Event::End(BytesEnd::new("loginTicketResponse")))?;
        String::from_utf8(writer.into_inner()).context("ticket xml is not utf-8")
    }
}

pub(crate) fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|time| time.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in ticket xml: {text}"))
}
