use std::collections::HashMap;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Normalized medical record categories. The serialized spellings are the
/// singular snake_case forms stored in the metadata store and used by the
/// query-understanding filter mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Note,
    Document,
    Medication,
    Condition,
    Allergy,
    CarePlan,
    FormResponse,
    Message,
    LabObservation,
    Vital,
    Appointment,
    Superbill,
    InsurancePolicy,
    Task,
    FamilyHistory,
    IntakeFlow,
    Form,
}

impl ArtifactType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Document => "document",
            Self::Medication => "medication",
            Self::Condition => "condition",
            Self::Allergy => "allergy",
            Self::CarePlan => "care_plan",
            Self::FormResponse => "form_response",
            Self::Message => "message",
            Self::LabObservation => "lab_observation",
            Self::Vital => "vital",
            Self::Appointment => "appointment",
            Self::Superbill => "superbill",
            Self::InsurancePolicy => "insurance_policy",
            Self::Task => "task",
            Self::FamilyHistory => "family_history",
            Self::IntakeFlow => "intake_flow",
            Self::Form => "form",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "note" => Ok(Self::Note),
            "document" => Ok(Self::Document),
            "medication" => Ok(Self::Medication),
            "condition" => Ok(Self::Condition),
            "allergy" => Ok(Self::Allergy),
            "care_plan" => Ok(Self::CarePlan),
            "form_response" => Ok(Self::FormResponse),
            "message" => Ok(Self::Message),
            "lab_observation" => Ok(Self::LabObservation),
            "vital" => Ok(Self::Vital),
            "appointment" => Ok(Self::Appointment),
            "superbill" => Ok(Self::Superbill),
            "insurance_policy" => Ok(Self::InsurancePolicy),
            "task" => Ok(Self::Task),
            "family_history" => Ok(Self::FamilyHistory),
            "intake_flow" => Ok(Self::IntakeFlow),
            "form" => Ok(Self::Form),
            other => Err(format!("unknown artifact type '{other}'")),
        }
    }
}

stored_object!(Artifact, "artifact", {
    patient_id: String,
    artifact_type: ArtifactType,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    occurred_at: DateTime<Utc>,
    author: Option<String>,
    title: Option<String>,
    text: String,
    source_url: Option<String>,
    meta: Option<HashMap<String, String>>
});

impl Artifact {
    pub fn new(
        patient_id: String,
        artifact_type: ArtifactType,
        occurred_at: DateTime<Utc>,
        text: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            patient_id,
            artifact_type,
            occurred_at,
            author: None,
            title: None,
            text,
            source_url: None,
            meta: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub async fn for_patient(
        db: &SurrealDbClient,
        patient_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let artifacts: Vec<Self> = db
            .client
            .query("SELECT * FROM artifact WHERE patient_id = $patient_id ORDER BY occurred_at DESC")
            .bind(("patient_id", patient_id.to_owned()))
            .await?
            .take(0)?;
        Ok(artifacts)
    }
}
