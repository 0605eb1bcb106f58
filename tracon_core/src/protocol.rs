//! Wire message table for the network protocol backend.
//!
//! Lines are colon-separated fields. The first field is a message tag
//! followed directly by the sender's callsign (`$HOSEA_CTR:SEA_APP:ASA12`),
//! except position reports, whose first field is `@` plus the transponder
//! mode and whose second field is the sender.
//!
//! Each `MessageSpec` is a pure decoder from fields to an optional
//! `WireMessage`. The `Dispatcher` tries every spec in order and keeps
//! every match, so a line that two specs recognise is applied twice.

use crate::error::ProtocolError;
use crate::model::{FlightPlan, FlightRules, NetworkRating, Squawk, TransponderMode};
use geo::Point;
use std::str::FromStr;
use tracing::warn;

/// Address for lines meant for every controller.
pub const ALL_CONTROLLERS: &str = "@94835";

/// Address for lines meant for everyone.
pub const BROADCAST: &str = "*";

/// Address of the network server itself.
pub const SERVER: &str = "SERVER";

// ============================================================================
// MESSAGES
// ============================================================================

/// Controller-to-controller sub-messages carried in `#PC` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcpKind {
    InitiateTrack,
    DropTrack,
    CancelHandoff,
    RejectHandoff,
    Scratchpad,
    BeaconCode,
    TemporaryAltitude,
}

impl CcpKind {
    pub fn code(&self) -> &'static str {
        match self {
            CcpKind::InitiateTrack => "IT",
            CcpKind::DropTrack => "DR",
            CcpKind::CancelHandoff => "HC",
            CcpKind::RejectHandoff => "HR",
            CcpKind::Scratchpad => "SC",
            CcpKind::BeaconCode => "BC",
            CcpKind::TemporaryAltitude => "TA",
        }
    }

    /// Sub-messages carrying a value after the aircraft callsign.
    fn has_argument(&self) -> bool {
        matches!(
            self,
            CcpKind::Scratchpad | CcpKind::BeaconCode | CcpKind::TemporaryAltitude
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// `#AA`: a controller signed on
    AddController {
        from: String,
        to: String,
        name: String,
        cid: String,
        rating: NetworkRating,
    },

    /// `#DA`: a controller signed off
    RemoveController { from: String },

    /// `#AP`: a pilot signed on
    AddPilot {
        from: String,
        to: String,
        cid: String,
        rating: u8,
        name: String,
    },

    /// `#DP`: a pilot signed off
    RemovePilot { from: String },

    /// `%`: controller frequency, facility and radar position
    ControllerPosition {
        from: String,
        frequency: String,
        facility: String,
        scope_range: i32,
        rating: NetworkRating,
        location: Point<f64>,
    },

    /// `@`: aircraft position report
    PilotPosition {
        from: String,
        mode: TransponderMode,
        squawk: Squawk,
        rating: u8,
        location: Point<f64>,
        altitude: i32,
        groundspeed: i32,
        heading: Option<f64>,
    },

    /// `$FP`: flight plan filed by the aircraft
    FlightPlan { from: String, to: String, plan: FlightPlan },

    /// `$AM`: flight plan amended by a controller
    AmendFlightPlan {
        from: String,
        to: String,
        callsign: String,
        plan: FlightPlan,
    },

    /// `#TM`: text; `to` is `None` for broadcasts
    TextMessage {
        from: String,
        to: Option<String>,
        contents: String,
    },

    /// `$HO`: `from` offers `callsign` to `to`
    HandoffOffer { from: String, to: String, callsign: String },

    /// `$HA`: `from` accepted the handoff `to` offered
    HandoffAccept { from: String, to: String, callsign: String },

    /// `#PC ... CCP`
    Ccp {
        from: String,
        to: String,
        kind: CcpKind,
        callsign: String,
        argument: String,
    },

    /// `$AR`: METAR reply
    Metar { from: String, to: String, text: String },

    /// `$CR ... ATIS`: one line of a controller's ATIS
    Atis {
        from: String,
        to: String,
        kind: String,
        text: String,
    },
}

impl WireMessage {
    /// Formats the message as one wire line.
    pub fn encode(&self) -> String {
        match self {
            WireMessage::AddController {
                from,
                to,
                name,
                cid,
                rating,
            } => format!("#AA{}:{}:{}:{}:{}", from, to, name, cid, rating.wire_value()),
            WireMessage::RemoveController { from } => format!("#DA{}", from),
            WireMessage::AddPilot {
                from,
                to,
                cid,
                rating,
                name,
            } => format!("#AP{}:{}:{}:{}:{}", from, to, cid, rating, name),
            WireMessage::RemovePilot { from } => format!("#DP{}", from),
            WireMessage::ControllerPosition {
                from,
                frequency,
                facility,
                scope_range,
                rating,
                location,
            } => format!(
                "%{}:{}:{}:{}:{}:{:.5}:{:.5}",
                from,
                encode_frequency(frequency),
                facility_code(facility),
                scope_range,
                rating.wire_value(),
                location.y(),
                location.x()
            ),
            WireMessage::PilotPosition {
                from,
                mode,
                squawk,
                rating,
                location,
                altitude,
                groundspeed,
                heading,
            } => {
                let mut line = format!(
                    "@{}:{}:{}:{}:{:.5}:{:.5}:{}:{}",
                    mode.wire_code(),
                    from,
                    squawk,
                    rating,
                    location.y(),
                    location.x(),
                    altitude,
                    groundspeed
                );
                if let Some(h) = heading {
                    line += &format!(":{:.0}", h);
                }
                line
            }
            WireMessage::FlightPlan { from, to, plan } => {
                format!("$FP{}:{}:{}", from, to, encode_plan(plan))
            }
            WireMessage::AmendFlightPlan {
                from,
                to,
                callsign,
                plan,
            } => format!("$AM{}:{}:{}:{}", from, to, callsign, encode_plan(plan)),
            WireMessage::TextMessage { from, to, contents } => {
                format!("#TM{}:{}:{}", from, to.as_deref().unwrap_or(BROADCAST), contents)
            }
            WireMessage::HandoffOffer { from, to, callsign } => format!("$HO{}:{}:{}", from, to, callsign),
            WireMessage::HandoffAccept { from, to, callsign } => format!("$HA{}:{}:{}", from, to, callsign),
            WireMessage::Ccp {
                from,
                to,
                kind,
                callsign,
                argument,
            } => {
                let mut line = format!("#PC{}:{}:CCP:{}:{}", from, to, kind.code(), callsign);
                if kind.has_argument() {
                    line += ":";
                    line += argument;
                }
                line
            }
            WireMessage::Metar { from, to, text } => format!("$AR{}:{}:METAR:{}", from, to, text),
            WireMessage::Atis { from, to, kind, text } => format!("$CR{}:{}:ATIS:{}:{}", from, to, kind, text),
        }
    }
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

type Decoded = Option<Result<WireMessage, ProtocolError>>;

fn attempt(decode: impl FnOnce() -> Result<WireMessage, ProtocolError>) -> Decoded {
    Some(decode())
}

/// Sender callsign following `tag` in the first field, if the tag matches.
fn sender<'a>(fields: &[&'a str], tag: &str) -> Option<&'a str> {
    fields.first()?.strip_prefix(tag)
}

fn require(tag: &'static str, fields: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if fields.len() < expected {
        Err(ProtocolError::MissingField {
            tag,
            expected,
            got: fields.len(),
        })
    } else {
        Ok(())
    }
}

fn number<T: FromStr>(tag: &'static str, field: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.trim().parse().map_err(|_| ProtocolError::BadNumber {
        tag,
        field,
        value: value.to_string(),
    })
}

fn coordinate(tag: &'static str, lat: &str, lon: &str) -> Result<Point<f64>, ProtocolError> {
    let lat: f64 = number(tag, "latitude", lat)?;
    let lon: f64 = number(tag, "longitude", lon)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ProtocolError::malformed(tag, format!("coordinate {}, {} out of range", lat, lon)));
    }
    Ok(Point::new(lon, lat))
}

fn rating(tag: &'static str, value: &str) -> Result<NetworkRating, ProtocolError> {
    let raw: u8 = number(tag, "rating", value)?;
    NetworkRating::from_wire(raw).ok_or_else(|| ProtocolError::malformed(tag, format!("unknown rating {}", raw)))
}

/// Filed altitudes come as feet or as `FL350`.
fn altitude(tag: &'static str, value: &str) -> Result<i32, ProtocolError> {
    match value.strip_prefix("FL") {
        Some(level) => Ok(number::<i32>(tag, "altitude", level)? * 100),
        None => number(tag, "altitude", value),
    }
}

/// `33650` on the wire is 133.650.
fn decode_frequency(value: &str) -> String {
    if value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit()) {
        format!("1{}.{}", &value[..2], &value[2..])
    } else {
        value.to_string()
    }
}

fn encode_frequency(frequency: &str) -> String {
    match frequency.strip_prefix('1').and_then(|f| f.split_once('.')) {
        Some((mhz, khz)) if mhz.len() == 2 && khz.len() == 3 => format!("{}{}", mhz, khz),
        _ => frequency.to_string(),
    }
}

const FACILITIES: [&str; 7] = ["OBS", "FSS", "DEL", "GND", "TWR", "APP", "CTR"];

fn facility_name(code: &str) -> String {
    code.parse::<usize>()
        .ok()
        .and_then(|i| FACILITIES.get(i))
        .map_or_else(|| code.to_string(), |name| name.to_string())
}

fn facility_code(name: &str) -> String {
    FACILITIES
        .iter()
        .position(|f| *f == name)
        .map_or_else(|| name.to_string(), |i| i.to_string())
}

/// Flight plan fields in wire order, starting at the flight rules.
///
/// `rules:type:tas:dep:deptime:actdeptime:alt:arr:hrs:mins:fuelhrs:fuelmins:alternate:remarks:route`
const PLAN_FIELDS: usize = 15;

fn decode_plan(tag: &'static str, fields: &[&str]) -> Result<FlightPlan, ProtocolError> {
    let rules = match fields[0] {
        "I" => FlightRules::Ifr,
        "V" => FlightRules::Vfr,
        other => return Err(ProtocolError::malformed(tag, format!("unknown flight rules {:?}", other))),
    };
    Ok(FlightPlan {
        rules,
        aircraft_type: fields[1].to_string(),
        tas: number(tag, "tas", fields[2])?,
        departure_airport: fields[3].to_string(),
        altitude: altitude(tag, fields[6])?,
        arrival_airport: fields[7].to_string(),
        alternate_airport: fields[12].to_string(),
        remarks: fields[13].to_string(),
        route: fields[14..].join(":"),
    })
}

fn encode_plan(plan: &FlightPlan) -> String {
    format!(
        "{}:{}:{}:{}:0:0:{}:{}:0:0:0:0:{}:{}:{}",
        plan.rules.wire_code(),
        plan.aircraft_type,
        plan.tas,
        plan.departure_airport,
        plan.altitude,
        plan.arrival_airport,
        plan.alternate_airport,
        plan.remarks,
        plan.route
    )
}

// ============================================================================
// DECODERS
// ============================================================================

fn decode_add_controller(fields: &[&str]) -> Decoded {
    let from = sender(fields, "#AA")?;
    attempt(|| {
        require("#AA", fields, 5)?;
        Ok(WireMessage::AddController {
            from: from.to_string(),
            to: fields[1].to_string(),
            name: fields[2].to_string(),
            cid: fields[3].to_string(),
            rating: rating("#AA", fields[4])?,
        })
    })
}

fn decode_remove_controller(fields: &[&str]) -> Decoded {
    let from = sender(fields, "#DA")?;
    Some(Ok(WireMessage::RemoveController { from: from.to_string() }))
}

fn decode_add_pilot(fields: &[&str]) -> Decoded {
    let from = sender(fields, "#AP")?;
    attempt(|| {
        require("#AP", fields, 5)?;
        Ok(WireMessage::AddPilot {
            from: from.to_string(),
            to: fields[1].to_string(),
            cid: fields[2].to_string(),
            rating: number("#AP", "rating", fields[3])?,
            name: fields[4].to_string(),
        })
    })
}

fn decode_remove_pilot(fields: &[&str]) -> Decoded {
    let from = sender(fields, "#DP")?;
    Some(Ok(WireMessage::RemovePilot { from: from.to_string() }))
}

fn decode_controller_position(fields: &[&str]) -> Decoded {
    let from = sender(fields, "%")?;
    attempt(|| {
        require("%", fields, 7)?;
        Ok(WireMessage::ControllerPosition {
            from: from.to_string(),
            frequency: decode_frequency(fields[1]),
            facility: facility_name(fields[2]),
            scope_range: number("%", "range", fields[3])?,
            rating: rating("%", fields[4])?,
            location: coordinate("%", fields[5], fields[6])?,
        })
    })
}

fn decode_pilot_position(fields: &[&str]) -> Decoded {
    let mode = sender(fields, "@")?;
    attempt(|| {
        require("@", fields, 8)?;
        let mode = mode
            .chars()
            .next()
            .and_then(TransponderMode::from_wire)
            .ok_or_else(|| ProtocolError::malformed("@", format!("unknown transponder mode {:?}", mode)))?;
        let squawk = Squawk::from_str(fields[2]).map_err(|_| ProtocolError::BadNumber {
            tag: "@",
            field: "squawk",
            value: fields[2].to_string(),
        })?;
        let heading = match fields.get(8) {
            Some(h) if !h.is_empty() => Some(number("@", "heading", h)?),
            _ => None,
        };
        Ok(WireMessage::PilotPosition {
            from: fields[1].to_string(),
            mode,
            squawk,
            rating: number("@", "rating", fields[3])?,
            location: coordinate("@", fields[4], fields[5])?,
            altitude: number("@", "altitude", fields[6])?,
            groundspeed: number("@", "groundspeed", fields[7])?,
            heading,
        })
    })
}

fn decode_flight_plan(fields: &[&str]) -> Decoded {
    let from = sender(fields, "$FP")?;
    attempt(|| {
        require("$FP", fields, 2 + PLAN_FIELDS)?;
        Ok(WireMessage::FlightPlan {
            from: from.to_string(),
            to: fields[1].to_string(),
            plan: decode_plan("$FP", &fields[2..])?,
        })
    })
}

fn decode_amend_flight_plan(fields: &[&str]) -> Decoded {
    let from = sender(fields, "$AM")?;
    attempt(|| {
        require("$AM", fields, 3 + PLAN_FIELDS)?;
        Ok(WireMessage::AmendFlightPlan {
            from: from.to_string(),
            to: fields[1].to_string(),
            callsign: fields[2].to_string(),
            plan: decode_plan("$AM", &fields[3..])?,
        })
    })
}

fn decode_text_message(fields: &[&str]) -> Decoded {
    let from = sender(fields, "#TM")?;
    attempt(|| {
        require("#TM", fields, 3)?;
        let to = match fields[1] {
            BROADCAST => None,
            to => Some(to.to_string()),
        };
        Ok(WireMessage::TextMessage {
            from: from.to_string(),
            to,
            contents: fields[2..].join(":"),
        })
    })
}

fn decode_handoff_offer(fields: &[&str]) -> Decoded {
    let from = sender(fields, "$HO")?;
    attempt(|| {
        require("$HO", fields, 3)?;
        Ok(WireMessage::HandoffOffer {
            from: from.to_string(),
            to: fields[1].to_string(),
            callsign: fields[2].to_string(),
        })
    })
}

fn decode_handoff_accept(fields: &[&str]) -> Decoded {
    let from = sender(fields, "$HA")?;
    attempt(|| {
        require("$HA", fields, 3)?;
        Ok(WireMessage::HandoffAccept {
            from: from.to_string(),
            to: fields[1].to_string(),
            callsign: fields[2].to_string(),
        })
    })
}

/// Decoder for one CCP sub-message kind.
fn decode_ccp(fields: &[&str], kind: CcpKind) -> Decoded {
    let from = sender(fields, "#PC")?;
    if fields.get(2) != Some(&"CCP") || fields.get(3) != Some(&kind.code()) {
        return None;
    }
    attempt(|| {
        let expected = if kind.has_argument() { 6 } else { 5 };
        require("#PC", fields, expected)?;
        let argument = fields.get(5..).map(|rest| rest.join(":")).unwrap_or_default();
        match kind {
            CcpKind::BeaconCode => {
                Squawk::from_str(&argument).map_err(|_| ProtocolError::BadNumber {
                    tag: "#PC",
                    field: "squawk",
                    value: argument.clone(),
                })?;
            }
            CcpKind::TemporaryAltitude => {
                number::<i32>("#PC", "altitude", &argument)?;
            }
            _ => {}
        }
        Ok(WireMessage::Ccp {
            from: from.to_string(),
            to: fields[1].to_string(),
            kind,
            callsign: fields[4].to_string(),
            argument,
        })
    })
}

fn decode_metar(fields: &[&str]) -> Decoded {
    let from = sender(fields, "$AR")?;
    if fields.get(2) != Some(&"METAR") {
        return None;
    }
    attempt(|| {
        require("$AR", fields, 4)?;
        Ok(WireMessage::Metar {
            from: from.to_string(),
            to: fields[1].to_string(),
            text: fields[3..].join(":"),
        })
    })
}

fn decode_atis(fields: &[&str]) -> Decoded {
    let from = sender(fields, "$CR")?;
    if fields.get(2) != Some(&"ATIS") {
        return None;
    }
    attempt(|| {
        require("$CR", fields, 4)?;
        Ok(WireMessage::Atis {
            from: from.to_string(),
            to: fields[1].to_string(),
            kind: fields[3].to_string(),
            text: fields.get(4..).map(|rest| rest.join(":")).unwrap_or_default(),
        })
    })
}

// ============================================================================
// DISPATCH TABLE
// ============================================================================

/// One entry of the dispatch table.
#[derive(Clone, Copy)]
pub struct MessageSpec {
    pub name: &'static str,

    /// Returns `None` if the line is not this kind of message.
    pub decode: fn(&[&str]) -> Decoded,
}

impl std::fmt::Debug for MessageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSpec").field("name", &self.name).finish()
    }
}

/// The standard table, in matching order.
pub fn standard_specs() -> Vec<MessageSpec> {
    fn spec(name: &'static str, decode: fn(&[&str]) -> Decoded) -> MessageSpec {
        MessageSpec { name, decode }
    }
    vec![
        spec("add controller", decode_add_controller),
        spec("remove controller", decode_remove_controller),
        spec("add pilot", decode_add_pilot),
        spec("remove pilot", decode_remove_pilot),
        spec("controller position", decode_controller_position),
        spec("pilot position", decode_pilot_position),
        spec("flight plan", decode_flight_plan),
        spec("amend flight plan", decode_amend_flight_plan),
        spec("text message", decode_text_message),
        spec("handoff offer", decode_handoff_offer),
        spec("handoff accept", decode_handoff_accept),
        spec("initiate track", |f| decode_ccp(f, CcpKind::InitiateTrack)),
        spec("drop track", |f| decode_ccp(f, CcpKind::DropTrack)),
        spec("cancel handoff", |f| decode_ccp(f, CcpKind::CancelHandoff)),
        spec("reject handoff", |f| decode_ccp(f, CcpKind::RejectHandoff)),
        spec("scratchpad", |f| decode_ccp(f, CcpKind::Scratchpad)),
        spec("beacon code", |f| decode_ccp(f, CcpKind::BeaconCode)),
        spec("temporary altitude", |f| decode_ccp(f, CcpKind::TemporaryAltitude)),
        spec("metar", decode_metar),
        spec("atis", decode_atis),
    ]
}

/// Applies every matching spec to each line.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    specs: Vec<MessageSpec>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(standard_specs())
    }
}

impl Dispatcher {
    pub fn new(specs: Vec<MessageSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[MessageSpec] {
        &self.specs
    }

    /// Decodes one line into every message it matches, in table order.
    ///
    /// Empty lines, unmatched lines and malformed matches are logged and
    /// contribute nothing.
    pub fn dispatch(&self, line: &str) -> Vec<WireMessage> {
        let line = line.trim();
        if line.is_empty() {
            warn!("protocol: empty line received");
            return Vec::new();
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields[0].is_empty() {
            warn!("protocol: empty first field {:?}", line);
            return Vec::new();
        }

        let mut matched = 0;
        let mut messages = Vec::new();
        for spec in &self.specs {
            match (spec.decode)(&fields) {
                None => {}
                Some(Ok(message)) => {
                    matched += 1;
                    messages.push(message);
                }
                Some(Err(err)) => {
                    matched += 1;
                    warn!("protocol: {} ({}): {:?}", err, spec.name, line);
                }
            }
        }
        if matched == 0 {
            warn!("protocol: no rule matched {:?}", line);
        }
        messages
    }
}
