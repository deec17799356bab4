//! Structured career-analysis schema shared by the pipeline, the store and the API.
//!
//! Every type here is what a pipeline stage deserializes the model's JSON into,
//! so deserialization doubles as schema validation.

use serde::{Deserialize, Deserializer, Serialize};

/// Which side of the comparison a profile describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Resume,
    Job,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub level: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub degree: String,
    pub major: String,
    pub school: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub company: String,
    pub title: String,
    pub start: String,
    pub end: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub must_have: Vec<String>,
    #[serde(default)]
    pub nice_to_have: Vec<String>,
}

/// Structured extraction of a resume or a job description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_type: ProfileType,
    pub title: String,
    pub years_experience: f64,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub experiences: Vec<Experience>,
    #[serde(default)]
    pub requirements: Option<Requirements>,
}

#[cfg(test)]
impl Profile {
    /// An empty profile of the given type, the shape the model is asked to
    /// return for the side of a request that was left blank.
    pub fn stub(profile_type: ProfileType) -> Self {
        Self {
            profile_type,
            title: String::new(),
            years_experience: 0.0,
            skills: Vec::new(),
            education: Vec::new(),
            experiences: Vec::new(),
            requirements: None,
        }
    }
}

/// A scored deficiency between the candidate and the job.
///
/// All three scores lie in `[0, 1]`. The model is asked to set
/// `priority = importance * attainability`; the value is kept as returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub id: String,
    pub name: String,
    pub importance: f64,
    pub attainability: f64,
    pub priority: f64,
    pub reason: String,
}

impl Gap {
    pub fn expected_priority(&self) -> f64 {
        self.importance * self.attainability
    }

    /// Checks every score is a finite number inside `[0, 1]`.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("importance", self.importance),
            ("attainability", self.attainability),
            ("priority", self.priority),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(format!(
                    "gap '{}' has {field}={value}, expected a value in [0, 1]",
                    self.id
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysisResult {
    #[serde(default)]
    pub gaps: Vec<Gap>,
}

impl GapAnalysisResult {
    pub fn validate(&self) -> Result<(), String> {
        self.gaps.iter().try_for_each(Gap::validate)
    }
}

/// How well a job requirement is evidenced by the resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    Full,
    Partial,
    None,
}

impl Coverage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coverage::Full => "full",
            Coverage::Partial => "partial",
            Coverage::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JdPoint {
    pub id: String,
    pub text: String,
    pub category: String,
    pub required_level: String,
    pub mandatory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedExperience {
    pub experience_id: String,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeMapping {
    pub jd_point_id: String,
    pub coverage: Coverage,
    #[serde(default)]
    pub match_experiences: Vec<MatchedExperience>,
}

/// Point-by-point coverage of job requirements against resume evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JdMappingMatrix {
    #[serde(default)]
    pub jd_points: Vec<JdPoint>,
    #[serde(default)]
    pub resume_mapping: Vec<ResumeMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningResource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningTask {
    pub title: String,
    #[serde(deserialize_with = "whole_number")]
    pub estimated_hours: u32,
    #[serde(default)]
    pub resources: Vec<LearningResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPhase {
    pub name: String,
    #[serde(deserialize_with = "whole_number")]
    pub duration_weeks: u32,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<LearningTask>,
}

/// Accepts `6` and `6.0` alike; models often emit whole counts as floats.
/// Fractional, negative and out-of-range values are rejected.
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() && value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value) {
        Ok(value as u32)
    } else {
        Err(serde::de::Error::custom(format!(
            "expected a non-negative whole number, got {value}"
        )))
    }
}

/// Ordered phases; phase order is the order the candidate should follow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningPlan {
    #[serde(default)]
    pub phases: Vec<LearningPhase>,
}

/// Aggregate of all four stages. This is the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullAnalysisResult {
    pub resume_profile: Profile,
    pub job_profile: Profile,
    pub gap_analysis: GapAnalysisResult,
    pub jd_mapping_matrix: JdMappingMatrix,
    pub learning_plan: LearningPlan,
    pub custom_resume_markdown: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(importance: f64, attainability: f64, priority: f64) -> Gap {
        Gap {
            id: "gap1".to_string(),
            name: "System design".to_string(),
            importance,
            attainability,
            priority,
            reason: "No large-scale architecture work on the resume".to_string(),
        }
    }

    #[test]
    fn test_profile_deserializes_with_missing_optional_arrays() {
        let json = r#"{
            "profile_type": "job",
            "title": "Senior Backend Engineer",
            "years_experience": 5,
            "skills": [{"name": "Rust", "level": "expert"}],
            "requirements": {"must_have": ["Rust", "PostgreSQL"]}
        }"#;

        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.profile_type, ProfileType::Job);
        assert_eq!(profile.years_experience, 5.0);
        assert_eq!(profile.skills[0].evidence, None);
        assert!(profile.education.is_empty());
        let requirements = profile.requirements.unwrap();
        assert_eq!(requirements.must_have.len(), 2);
        assert!(requirements.nice_to_have.is_empty());
    }

    #[test]
    fn test_profile_rejects_unknown_profile_type() {
        let json = r#"{"profile_type": "cover_letter", "title": "", "years_experience": 0}"#;
        assert!(serde_json::from_str::<Profile>(json).is_err());
    }

    #[test]
    fn test_stub_profile_is_empty() {
        let stub = Profile::stub(ProfileType::Resume);
        assert_eq!(stub.title, "");
        assert_eq!(stub.years_experience, 0.0);
        assert!(stub.skills.is_empty() && stub.experiences.is_empty());
    }

    #[test]
    fn test_gap_validate_accepts_unit_interval() {
        assert!(gap(0.9, 0.6, 0.54).validate().is_ok());
        assert!(gap(0.0, 1.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_gap_validate_rejects_out_of_range() {
        let err = gap(1.2, 0.5, 0.6).validate().unwrap_err();
        assert!(err.contains("importance"));
        assert!(gap(0.5, 0.5, -0.1).validate().is_err());
        assert!(gap(f64::NAN, 0.5, 0.2).validate().is_err());
    }

    #[test]
    fn test_gap_expected_priority() {
        let g = gap(0.9, 0.6, 0.54);
        assert!((g.expected_priority() - 0.54).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Coverage::Partial).unwrap(), r#""partial""#);
        let c: Coverage = serde_json::from_str(r#""none""#).unwrap();
        assert_eq!(c, Coverage::None);
        assert!(serde_json::from_str::<Coverage>(r#""Weak""#).is_err());
    }

    #[test]
    fn test_learning_plan_deserializes() {
        let json = r#"{
            "phases": [{
                "name": "Foundations",
                "duration_weeks": 4,
                "goals": ["Distributed systems basics"],
                "tasks": [{
                    "title": "Work through MIT 6.824",
                    "estimated_hours": 10,
                    "resources": [{"title": "MIT 6.824", "url": "https://example.com"}]
                }]
            }]
        }"#;
        let plan: LearningPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.phases[0].duration_weeks, 4);
        assert_eq!(plan.phases[0].tasks[0].resources[0].title, "MIT 6.824");
    }

    #[test]
    fn test_learning_plan_accepts_whole_floats() {
        let json = r#"{"phases": [{"name": "P", "duration_weeks": 2.0,
            "tasks": [{"title": "T", "estimated_hours": 6.0}]}]}"#;
        let plan: LearningPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.phases[0].duration_weeks, 2);
        assert_eq!(plan.phases[0].tasks[0].estimated_hours, 6);
    }

    #[test]
    fn test_learning_plan_rejects_fractional_or_negative_counts() {
        for bad in ["2.5", "-1", "\"two\""] {
            let json = format!(r#"{{"phases": [{{"name": "P", "duration_weeks": {bad}}}]}}"#);
            assert!(serde_json::from_str::<LearningPlan>(&json).is_err(), "{bad}");
        }
    }
}
