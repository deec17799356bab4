// Prompt templates for the four analysis stages.
// Placeholders in `{braces}` are replaced with `str::replace` before sending.

/// Sent in place of a blank resume so the model returns an empty resume stub.
pub const RESUME_PLACEHOLDER: &str = "\
This resume section is intentionally blank for a job-only request.
Return a resume_profile stub with empty arrays, title \"\", and years_experience 0.";

/// Sent in place of a blank job description so the model returns an empty job stub.
pub const JOB_PLACEHOLDER: &str = "\
This job description is intentionally blank for a resume-only request.
Return a job_profile stub with empty arrays, title \"\", and years_experience 0.";

/// Stage 1. Replace: {resume_text}, {jd_text}
pub const PARSE_PROFILE_TEMPLATE: &str = r#"You are a senior recruiting analyst. Read the resume and the job description below and return ONLY a JSON object with this exact structure:
{
  "resume_profile": {
    "profile_type": "resume",
    "title": "Full-stack Engineer",
    "years_experience": 4.5,
    "skills": [{"name": "Python", "level": "advanced", "evidence": "Built the backend APIs"}],
    "education": [{"degree": "BSc", "major": "Computer Science", "school": "Some University", "start": "2015", "end": "2019"}],
    "experiences": [{"id": "exp1", "company": "StartupX", "title": "Backend Engineer", "start": "2020-01", "end": "2022-12", "description": "Designed and shipped the API service"}],
    "requirements": null
  },
  "job_profile": {
    "profile_type": "job",
    "title": "Senior Backend Engineer",
    "years_experience": 5,
    "skills": [{"name": "PostgreSQL", "level": "expert", "evidence": "Listed as a core requirement"}],
    "education": [],
    "experiences": [],
    "requirements": {"must_have": ["PostgreSQL"], "nice_to_have": ["LLM orchestration"]}
  }
}

Rules:
1. Both `resume_profile` and `job_profile` MUST be present, even when a text is empty (use empty arrays and 0).
2. `profile_type` is "resume" or "job". Use empty arrays, never null, for `must_have` and `nice_to_have`.

RESUME:
```
{resume_text}
```

JOB DESCRIPTION:
```
{jd_text}
```"#;

/// Stage 2. Replace: {resume_profile_json}, {job_profile_json}
pub const GAP_ANALYSIS_TEMPLATE: &str = r#"You are a career development advisor. Compare the candidate profile with the job profile and return ONLY a JSON object with a gap analysis and a job-requirement to resume mapping matrix:
{
  "gap_analysis": {
    "gaps": [
      {"id": "gap1", "name": "System design", "importance": 0.9, "attainability": 0.6, "priority": 0.54, "reason": "The role leads large architectures; the resume shows none"}
    ]
  },
  "jd_mapping_matrix": {
    "jd_points": [
      {"id": "jd1", "text": "Design high-throughput REST APIs", "category": "backend", "required_level": "senior", "mandatory": true}
    ],
    "resume_mapping": [
      {"jd_point_id": "jd1", "coverage": "partial", "match_experiences": [{"experience_id": "exp1", "evidence": "Owned the API service"}]}
    ]
  }
}

Field rules: importance, attainability and priority are in [0, 1] and priority = importance * attainability. coverage is exactly one of "full", "partial", "none".

CANDIDATE PROFILE JSON:
```json
{resume_profile_json}
```

JOB PROFILE JSON:
```json
{job_profile_json}
```"#;

/// Stage 3. Replace: {gap_analysis_json}
pub const LEARNING_PLAN_TEMPLATE: &str = r#"You are a career coach. From the gap analysis below, build a learning plan of 2 to 4 phases. Each phase has a duration in weeks, goals, and tasks; each task has estimated hours and resource links. Return ONLY this JSON structure:
{
  "learning_plan": {
    "phases": [
      {
        "name": "Foundations",
        "duration_weeks": 4,
        "goals": ["Close the distributed systems gap"],
        "tasks": [
          {"title": "Work through a distributed systems course", "estimated_hours": 10, "resources": [{"title": "MIT 6.824", "url": "https://pdos.csail.mit.edu/6.824/"}]}
        ]
      }
    ]
  }
}

GAP ANALYSIS JSON:
```json
{gap_analysis_json}
```"#;

/// Stage 4. Replace: {resume_text}, {jd_text}
pub const CUSTOM_RESUME_TEMPLATE: &str = r#"Rewrite the resume for the job description below as Markdown with Summary, Skills, Experience and Achievements sections. Emphasize the strongest matches with the role and stay truthful: do not invent facts. Return ONLY this JSON:
{"custom_resume_markdown": "..."}

RESUME:
```
{resume_text}
```

JOB DESCRIPTION:
```
{jd_text}
```"#;

/// Fills `{name}` placeholders in a single left-to-right pass. Substituted
/// text is never rescanned, so user input containing `{jd_text}` stays literal.
/// Braces that do not form a known placeholder (the JSON examples) are kept.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(
        template.len() + vars.iter().map(|(_, value)| value.len()).sum::<usize>(),
    );
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = vars.iter().find_map(|(name, value)| {
            tail.strip_prefix('{')
                .and_then(|t| t.strip_prefix(*name))
                .and_then(|t| t.strip_prefix('}'))
                .map(|after| (*value, after))
        });
        match hit {
            Some((value, after)) => {
                out.push_str(value);
                rest = after;
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn build_parse_profile_prompt(resume_text: &str, jd_text: &str) -> String {
    render(
        PARSE_PROFILE_TEMPLATE,
        &[("resume_text", resume_text), ("jd_text", jd_text)],
    )
}

pub fn build_gap_analysis_prompt(resume_profile_json: &str, job_profile_json: &str) -> String {
    render(
        GAP_ANALYSIS_TEMPLATE,
        &[
            ("resume_profile_json", resume_profile_json),
            ("job_profile_json", job_profile_json),
        ],
    )
}

pub fn build_learning_plan_prompt(gap_analysis_json: &str) -> String {
    render(
        LEARNING_PLAN_TEMPLATE,
        &[("gap_analysis_json", gap_analysis_json)],
    )
}

pub fn build_custom_resume_prompt(resume_text: &str, jd_text: &str) -> String {
    render(
        CUSTOM_RESUME_TEMPLATE,
        &[("resume_text", resume_text), ("jd_text", jd_text)],
    )
}
