use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 7855;
pub const MAX_DATAGRAM_SIZE: usize = 1_000_000;

pub const MIN_COORDINATE_X: f64 = -768.0;
pub const MAX_COORDINATE_X: f64 = 768.0;
pub const MIN_COORDINATE_Y: f64 = -384.0;
pub const MAX_COORDINATE_Y: f64 = 384.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Director,
    Laborer,
    HumanResources,
    Cleaner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Hired,
    Regular,
    Probation,
    RecommendedForPromotion,
    Fired,
}

impl Status {
    pub fn name(self) -> &'static str {
        match self {
            Status::Hired => "hired",
            Status::Regular => "regular",
            Status::Probation => "probation",
            Status::RecommendedForPromotion => "recommended_for_promotion",
            Status::Fired => "fired",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hired" => Ok(Status::Hired),
            "regular" => Ok(Status::Regular),
            "probation" => Ok(Status::Probation),
            "recommended_for_promotion" => Ok(Status::RecommendedForPromotion),
            "fired" => Ok(Status::Fired),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Position::Director => "director",
            Position::Laborer => "laborer",
            Position::HumanResources => "human_resources",
            Position::Cleaner => "cleaner",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrgType {
    Commercial,
    Public,
    Government,
    Trust,
}

impl fmt::Display for OrgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrgType::Commercial => "commercial",
            OrgType::Public => "public",
            OrgType::Government => "government",
            OrgType::Trust => "trust",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub org_type: Option<OrgType>,
    pub annual_turnover: Option<f64>,
    pub address: Option<Address>,
}

/// A stored record. `id` and `created_at` are assigned by the server-side
/// store exactly once, at insertion; clients never supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: u64,
    pub name: String,
    pub coordinates: Coordinates,
    pub salary: f64,
    pub created_at: DateTime<Utc>,
    pub end_date: Option<NaiveDate>,
    pub position: Position,
    pub status: Status,
    pub organization: Organization,
}

/// Client-submitted worker payload: everything except the store-owned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDraft {
    pub name: String,
    pub coordinates: Coordinates,
    pub salary: f64,
    pub end_date: Option<NaiveDate>,
    pub position: Position,
    pub status: Status,
    pub organization: Organization,
}

impl WorkerDraft {
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if !(MIN_COORDINATE_X..=MAX_COORDINATE_X).contains(&self.coordinates.x) {
            problems.push(format!(
                "coordinate x {} out of range [{}, {}]",
                self.coordinates.x, MIN_COORDINATE_X, MAX_COORDINATE_X
            ));
        }
        if !(MIN_COORDINATE_Y..=MAX_COORDINATE_Y).contains(&self.coordinates.y) {
            problems.push(format!(
                "coordinate y {} out of range [{}, {}]",
                self.coordinates.y, MIN_COORDINATE_Y, MAX_COORDINATE_Y
            ));
        }
        if !(self.salary > 0.0) {
            problems.push(format!("salary {} must be positive", self.salary));
        }
        if self.organization.name.trim().is_empty() {
            problems.push("organization name must not be empty".to_string());
        }
        if let Some(turnover) = self.organization.annual_turnover {
            if !(turnover > 0.0) {
                problems.push(format!("annual turnover {} must be positive", turnover));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

impl Worker {
    pub fn from_draft(id: u64, created_at: DateTime<Utc>, draft: WorkerDraft) -> Self {
        Worker {
            id,
            name: draft.name,
            coordinates: draft.coordinates,
            salary: draft.salary,
            created_at,
            end_date: draft.end_date,
            position: draft.position,
            status: draft.status,
            organization: draft.organization,
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} @({}, {}) salary {:.2} position {} status {} org \"{}\"",
            self.id,
            self.name,
            self.coordinates.x,
            self.coordinates.y,
            self.salary,
            self.position,
            self.status,
            self.organization.name
        )?;
        if let Some(end) = self.end_date {
            write!(f, " ends {}", end)?;
        }
        Ok(())
    }
}

/// Display order for `show`: coordinate x, then y, then id.
pub fn display_order(a: &Worker, b: &Worker) -> Ordering {
    a.coordinates
        .x
        .total_cmp(&b.coordinates.x)
        .then(a.coordinates.y.total_cmp(&b.coordinates.y))
        .then(a.id.cmp(&b.id))
}

/// Total order used when processing salary-sorted snapshots: salary, then
/// name, then id, so duplicate salaries are handled deterministically.
pub fn salary_order(a: &Worker, b: &Worker) -> Ordering {
    a.salary
        .total_cmp(&b.salary)
        .then_with(|| a.name.cmp(&b.name))
        .then(a.id.cmp(&b.id))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

/// Opaque session token issued at login/register and required on every
/// other command. The transport is connectionless, so this is the only
/// session continuity there is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub u128);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Register,
    Login,
    Show,
    Info,
    Add,
    Update,
    RemoveById,
    Clear,
    AddIfMin,
    RemoveGreater,
    RemoveLower,
    CountByStatus,
    PrintAscending,
    PrintUniqueOrganization,
    Exit,
}

/// Declared argument shape of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Text,
    Payload,
    TextAndPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub arity: Arity,
    pub mutating: bool,
    pub query_class: bool,
    pub requires_auth: bool,
}

impl CommandKind {
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Register => "register",
            CommandKind::Login => "login",
            CommandKind::Show => "show",
            CommandKind::Info => "info",
            CommandKind::Add => "add",
            CommandKind::Update => "update",
            CommandKind::RemoveById => "remove_by_id",
            CommandKind::Clear => "clear",
            CommandKind::AddIfMin => "add_if_min",
            CommandKind::RemoveGreater => "remove_greater",
            CommandKind::RemoveLower => "remove_lower",
            CommandKind::CountByStatus => "count_by_status",
            CommandKind::PrintAscending => "print_ascending",
            CommandKind::PrintUniqueOrganization => "print_unique_organization",
            CommandKind::Exit => "exit",
        }
    }

    pub fn descriptor(self) -> Descriptor {
        let (arity, mutating, query_class, requires_auth) = match self {
            CommandKind::Register => (Arity::None, false, false, false),
            CommandKind::Login => (Arity::None, false, false, false),
            CommandKind::Show => (Arity::None, false, true, true),
            CommandKind::Info => (Arity::None, false, true, true),
            CommandKind::Add => (Arity::Payload, true, false, true),
            CommandKind::Update => (Arity::TextAndPayload, true, false, true),
            CommandKind::RemoveById => (Arity::Text, true, false, true),
            CommandKind::Clear => (Arity::None, true, false, true),
            CommandKind::AddIfMin => (Arity::Payload, true, false, true),
            CommandKind::RemoveGreater => (Arity::Payload, true, false, true),
            CommandKind::RemoveLower => (Arity::Payload, true, false, true),
            CommandKind::CountByStatus => (Arity::Text, false, true, true),
            CommandKind::PrintAscending => (Arity::None, false, true, true),
            CommandKind::PrintUniqueOrganization => (Arity::None, false, true, true),
            CommandKind::Exit => (Arity::None, false, false, true),
        };
        Descriptor {
            arity,
            mutating,
            query_class,
            requires_auth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub kind: CommandKind,
    pub argument: Option<String>,
    pub worker: Option<WorkerDraft>,
    pub credentials: Option<Credentials>,
    pub token: Option<SessionToken>,
}

impl Request {
    pub fn new(kind: CommandKind) -> Self {
        Request {
            kind,
            argument: None,
            worker: None,
            credentials: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Ok,
    Error,
    /// Sentinel for query commands when the client already holds the
    /// current snapshot; no collection is attached.
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub code: ResponseCode,
    pub body: String,
    pub body_args: Vec<String>,
    pub snapshot: Option<Vec<Worker>>,
    pub token: Option<SessionToken>,
}

impl Response {
    pub fn new(code: ResponseCode) -> Self {
        Response {
            code,
            body: String::new(),
            body_args: Vec::new(),
            snapshot: None,
            token: None,
        }
    }
}
