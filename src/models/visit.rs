//! Padharamani visit records.
//!
//! A visit lives in a single collection as a tagged variant: it starts as an
//! unscheduled `Request` and becomes `Assigned` on the first update that
//! supplies a date. Because both stages share one collection, the transition
//! is a single atomic file write and an id can never appear in both stages.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Status of a scheduled visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignedStatus {
    Scheduled,
    Canceled,
}

/// An incoming visit request that has not been scheduled yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRequest {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub email: String,
    #[serde(default)]
    pub comments: String,
    /// Always "Pending" while in the request stage.
    pub status: String,
    pub created_date: DateTime<Utc>,
}

/// A visit that has been scheduled with a date, time window and volunteers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedVisit {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub beginning_time: String,
    #[serde(default)]
    pub ending_time: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub email: String,
    #[serde(default)]
    pub transport_volunteer: String,
    #[serde(default)]
    pub volunteer_phone: String,
    #[serde(default)]
    pub zone_coordinator: String,
    #[serde(default)]
    pub zone_coordinator_phone: String,
    #[serde(default)]
    pub comments: String,
    pub status: AssignedStatus,
    pub created_date: DateTime<Utc>,
}

/// A visit record in either lifecycle stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Visit {
    Request(VisitRequest),
    Assigned(AssignedVisit),
}

impl Visit {
    pub fn id(&self) -> &str {
        match self {
            Visit::Request(r) => &r.id,
            Visit::Assigned(a) => &a.id,
        }
    }
}

/// Fields accepted when creating a new visit request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewVisitRequest {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub email: String,
    #[serde(default)]
    pub comments: String,
}

impl NewVisitRequest {
    pub fn into_request(self) -> VisitRequest {
        VisitRequest {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            phone: self.phone,
            address: self.address,
            city: self.city,
            email: self.email,
            comments: self.comments,
            status: "Pending".to_string(),
            created_date: Utc::now(),
        }
    }
}

/// Partial update applied to a visit in either stage.
///
/// Supplying `date` to a request-stage record triggers the one-time
/// Request -> Assigned transition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitPatch {
    pub date: Option<NaiveDate>,
    pub beginning_time: Option<String>,
    pub ending_time: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub email: Option<String>,
    pub transport_volunteer: Option<String>,
    pub volunteer_phone: Option<String>,
    pub zone_coordinator: Option<String>,
    pub zone_coordinator_phone: Option<String>,
    pub comments: Option<String>,
    pub status: Option<AssignedStatus>,
}

fn merge(field: &mut String, value: Option<String>) {
    if let Some(v) = value {
        *field = v;
    }
}

impl VisitPatch {
    /// Apply this patch to a request-stage record in place.
    pub fn apply_to_request(&self, request: &mut VisitRequest) {
        merge(&mut request.name, self.name.clone());
        merge(&mut request.phone, self.phone.clone());
        merge(&mut request.address, self.address.clone());
        merge(&mut request.city, self.city.clone());
        merge(&mut request.email, self.email.clone());
        merge(&mut request.comments, self.comments.clone());
    }

    /// Apply this patch to an assigned record in place.
    pub fn apply_to_assigned(&self, visit: &mut AssignedVisit) {
        if let Some(date) = self.date {
            visit.date = date;
        }
        merge(&mut visit.beginning_time, self.beginning_time.clone());
        merge(&mut visit.ending_time, self.ending_time.clone());
        merge(&mut visit.name, self.name.clone());
        merge(&mut visit.phone, self.phone.clone());
        merge(&mut visit.address, self.address.clone());
        merge(&mut visit.city, self.city.clone());
        merge(&mut visit.email, self.email.clone());
        merge(
            &mut visit.transport_volunteer,
            self.transport_volunteer.clone(),
        );
        merge(&mut visit.volunteer_phone, self.volunteer_phone.clone());
        merge(&mut visit.zone_coordinator, self.zone_coordinator.clone());
        merge(
            &mut visit.zone_coordinator_phone,
            self.zone_coordinator_phone.clone(),
        );
        merge(&mut visit.comments, self.comments.clone());
        if let Some(status) = self.status {
            visit.status = status;
        }
    }

    /// Build an assigned visit from a request plus this patch (the
    /// Request -> Assigned transition). `date` must be present.
    pub fn promote(&self, request: &VisitRequest, date: NaiveDate) -> AssignedVisit {
        let mut visit = AssignedVisit {
            id: request.id.clone(),
            date,
            beginning_time: String::new(),
            ending_time: String::new(),
            name: request.name.clone(),
            phone: request.phone.clone(),
            address: request.address.clone(),
            city: request.city.clone(),
            email: request.email.clone(),
            transport_volunteer: String::new(),
            volunteer_phone: String::new(),
            zone_coordinator: String::new(),
            zone_coordinator_phone: String::new(),
            comments: request.comments.clone(),
            status: AssignedStatus::Scheduled,
            created_date: request.created_date,
        };
        self.apply_to_assigned(&mut visit);
        visit
    }
}

/// Fields accepted when creating an assigned visit directly.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAssignedVisit {
    pub date: NaiveDate,
    #[serde(default)]
    pub beginning_time: String,
    #[serde(default)]
    pub ending_time: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub email: String,
    #[serde(default)]
    pub transport_volunteer: String,
    #[serde(default)]
    pub volunteer_phone: String,
    #[serde(default)]
    pub zone_coordinator: String,
    #[serde(default)]
    pub zone_coordinator_phone: String,
    #[serde(default)]
    pub comments: String,
}

impl NewAssignedVisit {
    pub fn into_assigned(self) -> AssignedVisit {
        AssignedVisit {
            id: uuid::Uuid::new_v4().to_string(),
            date: self.date,
            beginning_time: self.beginning_time,
            ending_time: self.ending_time,
            name: self.name,
            phone: self.phone,
            address: self.address,
            city: self.city,
            email: self.email,
            transport_volunteer: self.transport_volunteer,
            volunteer_phone: self.volunteer_phone,
            zone_coordinator: self.zone_coordinator,
            zone_coordinator_phone: self.zone_coordinator_phone,
            comments: self.comments,
            status: AssignedStatus::Scheduled,
            created_date: Utc::now(),
        }
    }
}
