use std::collections::HashMap;

use chrono::{DateTime, Utc};
use harvest_domain::{ConnectionId, Contact, ContactId, RangeUpdate};
use harvest_error::SyncError;
use tracing::info;

use crate::engine::SyncEngine;

pub const HEADER: [&str; 4] = ["Email", "Name", "First Contact", "Email Count"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub updated: usize,
    pub appended: usize,
}

/// Sheet writes needed to bring the sheet up to date with the contacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPlan {
    pub updates: Vec<RangeUpdate>,
    /// Rows to append, header first when the sheet was empty.
    pub appends: Vec<Vec<String>>,
    pub wrote_header: bool,
    pub exported: Vec<(ContactId, u64)>,
}

impl ExportPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.appends.is_empty()
    }

    pub fn summary(&self) -> ExportSummary {
        ExportSummary {
            updated: self.updates.len(),
            appended: self.appends.len() - usize::from(self.wrote_header),
        }
    }
}

fn format_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn contact_row(contact: &Contact) -> Vec<String> {
    vec![
        contact.email.clone(),
        contact.name.clone(),
        format_date(contact.first_contact_at),
        contact.email_count.to_string(),
    ]
}

/// Match contacts needing export against the rows already in `tab`.
/// Known emails are rewritten in place, the rest appended.
pub fn plan_export(contacts: &[Contact], existing: &[Vec<String>], tab: &str) -> ExportPlan {
    let start = match existing.first().and_then(|row| row.first()) {
        Some(cell) if cell == HEADER[0] => 1,
        _ => 0,
    };

    let mut rows: HashMap<String, usize> = HashMap::new();
    for (i, row) in existing.iter().enumerate().skip(start) {
        if let Some(email) = row.first().filter(|e| !e.is_empty()) {
            rows.insert(email.to_lowercase(), i + 1);
        }
    }

    let mut plan = ExportPlan::default();
    for contact in contacts.iter().filter(|c| c.needs_export()) {
        let row = contact_row(contact);
        match rows.get(&contact.email.to_lowercase()) {
            Some(n) => plan.updates.push(RangeUpdate {
                range: format!("{tab}!A{n}:D{n}"),
                values: vec![row],
            }),
            None => plan.appends.push(row),
        }
        plan.exported.push((contact.id.clone(), contact.email_count));
    }

    if existing.is_empty() && !plan.appends.is_empty() {
        plan.appends
            .insert(0, HEADER.iter().map(|h| h.to_string()).collect());
        plan.wrote_header = true;
    }
    plan
}

impl SyncEngine {
    /// Mirror changed contacts into the connection's sheet.
    pub async fn export_contacts(&self, id: &ConnectionId) -> Result<ExportSummary, SyncError> {
        let conn = self.connection(id).await?;
        let contacts = self.stores.contacts.list_contacts(id).await?;
        if contacts.is_empty() {
            return Ok(ExportSummary::default());
        }

        let token = self.access_token(&conn).await?;
        let range = format!("{}!A:D", conn.sheet_tab);
        let existing = self
            .providers
            .sheets
            .read_rows(&token, &conn.sheet_id, &range)
            .await?;

        let plan = plan_export(&contacts, &existing, &conn.sheet_tab);
        if plan.is_empty() {
            return Ok(ExportSummary::default());
        }

        if !plan.updates.is_empty() {
            self.providers
                .sheets
                .update_rows(&token, &conn.sheet_id, &plan.updates)
                .await?;
        }
        if !plan.appends.is_empty() {
            self.providers
                .sheets
                .append_rows(&token, &conn.sheet_id, &range, &plan.appends)
                .await?;
        }
        self.stores.contacts.mark_exported(&plan.exported).await?;

        let summary = plan.summary();
        info!(
            connection = %id,
            updated = summary.updated,
            appended = summary.appended,
            "exported contacts"
        );
        Ok(summary)
    }
}
