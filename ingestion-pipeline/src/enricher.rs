use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::{Artifact, ArtifactType},
            artifact_relationship::ArtifactRelationship,
        },
    },
};

/// Resolves the artifact's relationship tuples into a compact context
/// header ("Related Conditions: ..." / "Related Medications: ...").
/// The header is prepended to `enriched_text` for prompt context only and
/// never replaces the raw chunk text used for grounding.
pub async fn build_enrichment_header(
    db: &SurrealDbClient,
    artifact: &Artifact,
) -> Result<Option<(String, Vec<String>)>, AppError> {
    let relationships =
        ArtifactRelationship::for_subject(db, &artifact.id, &artifact.patient_id).await?;
    if relationships.is_empty() {
        return Ok(None);
    }

    let mut related_conditions: Vec<String> = Vec::new();
    let mut related_medications: Vec<String> = Vec::new();
    let mut relationship_ids = Vec::with_capacity(relationships.len());

    for relationship in relationships {
        relationship_ids.push(relationship.id.clone());
        let object: Option<Artifact> = db.get_item(&relationship.object_id).await?;
        let Some(object) = object else {
            continue;
        };

        let label = object
            .title
            .clone()
            .unwrap_or_else(|| first_words(&object.text, 6));

        match object.artifact_type {
            ArtifactType::Condition => push_unique(&mut related_conditions, label),
            ArtifactType::Medication => push_unique(&mut related_medications, label),
            _ => {}
        }
    }

    if related_conditions.is_empty() && related_medications.is_empty() {
        return Ok(None);
    }

    let mut header = String::new();
    if !related_conditions.is_empty() {
        header.push_str("Related Conditions: ");
        header.push_str(&related_conditions.join(", "));
        header.push('\n');
    }
    if !related_medications.is_empty() {
        header.push_str("Related Medications: ");
        header.push_str(&related_medications.join(", "));
        header.push('\n');
    }

    Ok(Some((header, relationship_ids)))
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

fn first_words(text: &str, count: usize) -> String {
    text.split_whitespace().take(count).collect::<Vec<_>>().join(" ")
}
