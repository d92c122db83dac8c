//! Visit record CRUD and computed views.
//!
//! All visits live in the single `visits` collection. The archived and
//! upcoming views are computed from the record's date and status relative to
//! "today"; nothing is physically moved on archival.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

use crate::models::{
    AssignedStatus, AssignedVisit, NewAssignedVisit, NewVisitRequest, Visit, VisitPatch,
    VisitRequest,
};
use crate::store::{RecordStore, StoreError};

/// Collection holding visit records (both lifecycle stages).
pub const VISITS_COLLECTION: &str = "visits";

pub struct VisitRegistry {
    store: Arc<RecordStore>,
}

impl VisitRegistry {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Create an unscheduled request (public submission path).
    pub async fn create_request(&self, new: NewVisitRequest) -> Result<VisitRequest, StoreError> {
        let request = new.into_request();
        let record = request.clone();
        self.store
            .update(VISITS_COLLECTION, move |visits: &mut Vec<Visit>| {
                visits.push(Visit::Request(record));
                Ok::<_, StoreError>(())
            })
            .await?;
        info!(id = %request.id, name = %request.name, "Visit request submitted");
        Ok(request)
    }

    /// Create a scheduled visit directly, skipping the request stage.
    pub async fn create_assigned(
        &self,
        new: NewAssignedVisit,
    ) -> Result<AssignedVisit, StoreError> {
        let visit = new.into_assigned();
        let record = visit.clone();
        self.store
            .update(VISITS_COLLECTION, move |visits: &mut Vec<Visit>| {
                visits.push(Visit::Assigned(record));
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(visit)
    }

    /// Apply a patch to a visit in either stage.
    ///
    /// The first patch carrying a `date` promotes a request to an assigned
    /// visit in place; both stages share the collection, so the transition is
    /// one atomic write and the id never exists twice.
    pub async fn update(&self, id: &str, patch: VisitPatch) -> Result<Visit, StoreError> {
        let id = id.to_string();
        let updated = self
            .store
            .update(VISITS_COLLECTION, move |visits: &mut Vec<Visit>| {
                let record = visits
                    .iter_mut()
                    .find(|v| v.id() == id)
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                let promoted = match record {
                    Visit::Request(request) => {
                        if let Some(date) = patch.date {
                            Some(Visit::Assigned(patch.promote(request, date)))
                        } else {
                            patch.apply_to_request(request);
                            None
                        }
                    }
                    Visit::Assigned(visit) => {
                        patch.apply_to_assigned(visit);
                        None
                    }
                };
                if let Some(assigned) = promoted {
                    *record = assigned;
                }
                Ok::<_, StoreError>(record.clone())
            })
            .await?;
        if matches!(updated, Visit::Assigned(_)) {
            info!(id = %updated.id(), "Visit updated");
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.store
            .update(VISITS_COLLECTION, move |visits: &mut Vec<Visit>| {
                let before = visits.len();
                visits.retain(|v| v.id() != id);
                if visits.len() == before {
                    return Err(StoreError::NotFound(id.clone()));
                }
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Visit>, StoreError> {
        let visits: Vec<Visit> = self.store.read(VISITS_COLLECTION).await?;
        Ok(visits.into_iter().find(|v| v.id() == id))
    }

    /// Unscheduled requests, oldest first.
    pub async fn requests(&self) -> Result<Vec<VisitRequest>, StoreError> {
        let visits: Vec<Visit> = self.store.read(VISITS_COLLECTION).await?;
        let mut requests: Vec<VisitRequest> = visits
            .into_iter()
            .filter_map(|v| match v {
                Visit::Request(r) => Some(r),
                Visit::Assigned(_) => None,
            })
            .collect();
        requests.sort_by(|a, b| a.created_date.cmp(&b.created_date));
        Ok(requests)
    }

    /// Scheduled visits on or after `today` that are not canceled, ordered by
    /// date then beginning time.
    pub async fn upcoming(&self, today: NaiveDate) -> Result<Vec<AssignedVisit>, StoreError> {
        let mut upcoming: Vec<AssignedVisit> = self
            .assigned()
            .await?
            .into_iter()
            .filter(|v| v.date >= today && v.status != AssignedStatus::Canceled)
            .collect();
        upcoming.sort_by(|a, b| (a.date, &a.beginning_time).cmp(&(b.date, &b.beginning_time)));
        Ok(upcoming)
    }

    /// Past or canceled visits, newest first. A computed view, not a
    /// physical move.
    pub async fn archived(&self, today: NaiveDate) -> Result<Vec<AssignedVisit>, StoreError> {
        let mut archived: Vec<AssignedVisit> = self
            .assigned()
            .await?
            .into_iter()
            .filter(|v| v.date < today || v.status == AssignedStatus::Canceled)
            .collect();
        archived.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(archived)
    }

    async fn assigned(&self) -> Result<Vec<AssignedVisit>, StoreError> {
        let visits: Vec<Visit> = self.store.read(VISITS_COLLECTION).await?;
        Ok(visits
            .into_iter()
            .filter_map(|v| match v {
                Visit::Assigned(a) => Some(a),
                Visit::Request(_) => None,
            })
            .collect())
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, VisitRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        (dir, VisitRegistry::new(store))
    }

    fn new_request(name: &str) -> NewVisitRequest {
        NewVisitRequest {
            name: name.to_string(),
            phone: "555-0100".to_string(),
            address: "12 Temple Rd".to_string(),
            city: "Edison".to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            comments: String::new(),
        }
    }

    #[tokio::test]
    async fn submitted_request_appears_only_in_requests_view() {
        let (_dir, registry) = registry();
        let request = registry.create_request(new_request("Mehta")).await.unwrap();
        assert_eq!(request.status, "Pending");

        let today = VisitRegistry::today();
        assert_eq!(registry.requests().await.unwrap().len(), 1);
        assert!(registry.upcoming(today).await.unwrap().is_empty());
        assert!(registry.archived(today).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn supplying_a_date_promotes_request_to_assigned() {
        let (_dir, registry) = registry();
        let request = registry.create_request(new_request("Mehta")).await.unwrap();

        let today = VisitRegistry::today();
        let patch = VisitPatch {
            date: Some(today + chrono::Duration::days(3)),
            beginning_time: Some("10:00".to_string()),
            ending_time: Some("11:00".to_string()),
            ..Default::default()
        };
        let updated = registry.update(&request.id, patch).await.unwrap();

        let visit = match updated {
            Visit::Assigned(v) => v,
            Visit::Request(_) => panic!("expected the record to be assigned"),
        };
        assert_eq!(visit.id, request.id);
        assert_eq!(visit.status, AssignedStatus::Scheduled);
        assert_eq!(visit.name, "Mehta");

        // Gone from requests, present exactly once in upcoming.
        assert!(registry.requests().await.unwrap().is_empty());
        let upcoming = registry.upcoming(today).await.unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, request.id);
    }

    #[tokio::test]
    async fn promotion_with_past_date_lands_in_archived() {
        let (_dir, registry) = registry();
        let request = registry.create_request(new_request("Shah")).await.unwrap();

        let today = VisitRegistry::today();
        let patch = VisitPatch {
            date: Some(today - chrono::Duration::days(1)),
            ..Default::default()
        };
        registry.update(&request.id, patch).await.unwrap();

        assert!(registry.upcoming(today).await.unwrap().is_empty());
        assert_eq!(registry.archived(today).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn canceled_visits_move_to_the_archived_view() {
        let (_dir, registry) = registry();
        let today = VisitRegistry::today();
        let visit = registry
            .create_assigned(NewAssignedVisit {
                date: today + chrono::Duration::days(2),
                beginning_time: "09:00".to_string(),
                ending_time: "10:00".to_string(),
                name: "Patel".to_string(),
                phone: "555-0101".to_string(),
                address: "3 Mandir Ln".to_string(),
                city: "Edison".to_string(),
                email: "patel@example.com".to_string(),
                transport_volunteer: String::new(),
                volunteer_phone: String::new(),
                zone_coordinator: String::new(),
                zone_coordinator_phone: String::new(),
                comments: String::new(),
            })
            .await
            .unwrap();

        let patch = VisitPatch {
            status: Some(AssignedStatus::Canceled),
            ..Default::default()
        };
        registry.update(&visit.id, patch).await.unwrap();

        assert!(registry.upcoming(today).await.unwrap().is_empty());
        assert_eq!(registry.archived(today).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upcoming_sorts_by_date_then_beginning_time() {
        let (_dir, registry) = registry();
        let today = VisitRegistry::today();
        for (days, time, name) in [(2, "14:00", "b"), (1, "10:00", "a"), (2, "09:00", "c")] {
            registry
                .create_assigned(NewAssignedVisit {
                    date: today + chrono::Duration::days(days),
                    beginning_time: time.to_string(),
                    ending_time: String::new(),
                    name: name.to_string(),
                    phone: String::new(),
                    address: String::new(),
                    city: String::new(),
                    email: String::new(),
                    transport_volunteer: String::new(),
                    volunteer_phone: String::new(),
                    zone_coordinator: String::new(),
                    zone_coordinator_phone: String::new(),
                    comments: String::new(),
                })
                .await
                .unwrap();
        }

        let upcoming = registry.upcoming(today).await.unwrap();
        let names: Vec<&str> = upcoming.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn updating_unknown_id_is_not_found() {
        let (_dir, registry) = registry();
        let err = registry
            .update("missing", VisitPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let (_dir, registry) = registry();
        let request = registry.create_request(new_request("Mehta")).await.unwrap();
        registry.delete(&request.id).await.unwrap();
        assert!(registry.get(&request.id).await.unwrap().is_none());
        assert!(matches!(
            registry.delete(&request.id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}
