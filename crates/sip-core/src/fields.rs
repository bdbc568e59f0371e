//! Blackboard field names and reserved sentinel values.

/// Inspector notes and documents; always supplied, possibly empty
pub const TEXTUAL_EVIDENCE: &str = "textual_evidence";
/// Location of classroom footage
pub const VIDEO_EVIDENCE_URI: &str = "video_evidence_uri";
/// Transcript of a classroom recording
pub const AUDIO_EVIDENCE_TRANSCRIPT: &str = "audio_evidence_transcript";

pub const VIDEO_SUMMARY: &str = "video_analysis_summary";
pub const AUDIO_SUMMARY: &str = "audio_analysis_summary";
pub const TEXT_SUMMARY: &str = "text_analysis_summary";

pub const PRELIMINARY_FINDINGS: &str = "preliminary_findings";
pub const EVALUATED_FINDINGS: &str = "evaluated_findings";
pub const DRAFT_REPORT: &str = "draft_report";
pub const REPORT_CRITIQUE: &str = "report_critique";
pub const FINAL_REPORT_TEXT: &str = "final_report_text";
pub const REPORT_PATH: &str = "final_report_path";

/// Reserved literals. Matching is exact and case-sensitive.
pub mod sentinel {
    pub const NO_VIDEO: &str = "No video evidence provided.";
    pub const NO_AUDIO: &str = "No audio evidence provided.";
    pub const NO_TEXT: &str = "No textual evidence provided.";

    /// Written by synthesis when every branch was skipped
    pub const INSUFFICIENT_EVIDENCE: &str = sip_retrieval::INSUFFICIENT_EVIDENCE;

    /// Returned by a critique that has nothing left to change
    pub const NO_FURTHER_CHANGES: &str = "NO_FURTHER_CHANGES";
}
