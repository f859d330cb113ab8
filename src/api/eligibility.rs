//! Checklist ordering checks.
//!
//! A DS-site checklist can only be filed once a pre-site checklist exists for
//! the same date, team and members. A job-start checklist needs the site
//! checklist (office) in the same way. The backend answers; this module builds
//! the query and turns the answer into something a form can show.

use serde::Deserialize;

use crate::errors::GatewayError;
use crate::transport::gateway::Gateway;
use crate::transport::RequestSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    /// Gates the DS-site checklist.
    PreSite,
    /// Gates the site job-start checklist.
    SiteChecklistOffice,
}

impl Prerequisite {
    pub fn path(self) -> &'static str {
        match self {
            Prerequisite::PreSite => "/api/pre-site-eligibility",
            Prerequisite::SiteChecklistOffice => "/api/site-checklist-office-eligibility",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Prerequisite::PreSite => "Pre-Site Checklist",
            Prerequisite::SiteChecklistOffice => "Site Checklist Office",
        }
    }

    fn incomplete_message(self) -> String {
        match self {
            Prerequisite::PreSite => {
                "Please select Date, Team Name, and Team Member(s) to check pre-site eligibility."
                    .to_string()
            }
            Prerequisite::SiteChecklistOffice => {
                "Please select Date, Team Name, and Team Member(s) to check Site Checklist Office eligibility."
                    .to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EligibilityQuery {
    /// `YYYY-MM-DD`, as entered on the form.
    pub checklist_date: String,
    pub team_name: String,
    pub team_members: Vec<String>,
}

impl EligibilityQuery {
    fn is_complete(&self) -> bool {
        !self.checklist_date.trim().is_empty()
            && !self.team_name.trim().is_empty()
            && !self.team_members.is_empty()
    }

    /// Members sorted and comma-joined so the backend sees one canonical key.
    fn members_key(&self) -> String {
        let mut members = self.team_members.clone();
        members.sort();
        members.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { message: String },
    NotEligible { message: String },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Eligibility::Eligible { message } | Eligibility::NotEligible { message } => message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EligibilityResponse {
    is_eligible: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Ask the backend whether the prerequisite checklist exists.
///
/// An incomplete query is answered locally without a request.
pub async fn check(
    gateway: &Gateway,
    prerequisite: Prerequisite,
    query: &EligibilityQuery,
) -> Result<Eligibility, GatewayError> {
    if !query.is_complete() {
        return Ok(Eligibility::NotEligible {
            message: prerequisite.incomplete_message(),
        });
    }

    let spec = RequestSpec::get(prerequisite.path())
        .query("checklistDate", query.checklist_date.trim())
        .query("teamName", query.team_name.trim())
        .query("teamMembers", query.members_key());
    let answer: EligibilityResponse = gateway.send(spec).await?.json()?;

    let label = prerequisite.label();
    Ok(if answer.is_eligible {
        Eligibility::Eligible {
            message: format!("{label} found. You can proceed."),
        }
    } else {
        Eligibility::NotEligible {
            message: answer
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("{label} not found for this team and date.")),
        }
    })
}
