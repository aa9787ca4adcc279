use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use super::ticket::{format_time, write_text_element};
use crate::endpoints::Service;

/// Half-width of the TRA validity window. The request is back-dated by
/// this amount and expires the same amount into the future; WSAA checks
/// both bounds against its own clock, so the offsets are exact.
pub const TRA_WINDOW_SECS: i64 = 600;

/// Unsigned login ticket request (TRA). Built per renewal attempt, handed
/// to the signer, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub unique_id: i64,
    pub generation_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub service: Service,
}

impl TicketRequest {
    pub fn new(service: Service, now: DateTime<Utc>) -> Self {
        Self {
            unique_id: now.timestamp(),
            generation_time: now - Duration::seconds(TRA_WINDOW_SECS),
            expiration_time: now + Duration::seconds(TRA_WINDOW_SECS),
            service,
        }
    }

    /// Render the `loginTicketRequest` v1.0 document submitted for
    /// signing.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let mut root = BytesStart::new("loginTicketRequest");
        root.push_attribute(("version", "1.0"));
        writer.write_event(Event::Start(root))?;
        writer.write_event(Event::Start(BytesStart::new("header")))?;
        write_text_element(&mut writer, "uniqueId", &self.unique_id.to_string())?;
        write_text_element(&mut writer, "generationTime", &format_time(self.generation_time))?;
        write_text_element(&mut writer, "expirationTime", &format_time(self.expiration_time))?;
        writer.write_event(Event::End(BytesEnd::new("header")))?;
        write_text_element(&mut writer, "service", self.service.id())?;
        writer.write_event(Event::End(BytesEnd::new("loginTicketRequest")))?;
        String::from_utf8(writer.into_inner()).context("ticket request xml is not utf-8")
    }
}
