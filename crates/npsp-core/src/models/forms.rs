//! Observation forms and the fields each one may write.
//!
//! Every form submission is checked against its allow-list before the store is touched;
//! request keys are never turned into column names or JSON paths directly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::subject::Sex;

/// Intake field that corrects the subject's own sex rather than adding a form entry.
pub const SEX_FIELD: &str = "sex_of_mouse";

/// A data-entry form filled in against an enrolled subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormKind {
    /// Intake and housing check (ITT)
    Intake,
    BodyweightTemp,
    SyringePrepTMinus1,
    SyringePrepT3,
    Induction,
    TreatmentInjection,
    /// Blood-gas panel
    Epoc,
    Biobanking,
    WbcCount,
    BacterialCultureInitial,
    BacterialCount24hr,
    Allocation,
}

const INTAKE_FIELDS: &[&str] = &[
    "actual_study_date",
    "date_of_birth",
    "cage_id",
    "is_study_date_different",
    "exclusion_criteria",
    "split_into_new_cage",
    "date_split_into_cage",
    "number_of_mice_in_cage",
    "communicated_with_npsp_coordinator",
    "itt_comments",
    "hqp_itt_data_entry_email",
    "hqp_itt_check_email",
    SEX_FIELD,
];

const BODYWEIGHT_TEMP_FIELDS: &[&str] = &[
    "body_weight_t0",
    "temperature_t0",
    "body_weight_t4",
    "temperature_t4",
    "body_weight_t8",
    "temperature_t8",
    "wellness_scores",
    "hqp_bodyweight_temp_entry_email",
    "hqp_bodyweight_temp_check_email",
    "temperature_device_used",
    "lubricant_used",
    "temperature_complications",
    "thermometer_cleaned",
    "humane_endpoint",
    "humane_endpoint_criteria",
    "deviations_bodyweight_temp",
    "comments_bodyweight_temp",
];

const SYRINGE_PREP_T_MINUS_1_FIELDS: &[&str] = &[
    "mouse_number_t1",
    "fecal_slurry_dextrose_volume",
    "syringe_number_t1",
    "hqp_syringe_prep_data_entry_email",
    "hqp_unblinded_syringe_prep_email",
    "time_of_first_injection",
    "fecal_slurry_source",
    "fecal_slurry_concentration",
    "vehicle_used",
    "number_of_frozen_fecal_slurry_1ml",
    "number_of_frozen_fecal_slurry_3ml",
    "number_of_frozen_fecal_slurry_5ml",
    "fecal_slurry_processing",
    "fecal_slurry_to_dextrose_ratio",
    "fecal_slurry_mixing_method",
    "syringe_diluted_fecal_slurry_loaded",
    "syringe_size_and_needle",
    "needle_color",
    "syringe_covering",
    "syringe_labeling_correct",
    "needle_dead_space_technique",
];

const SYRINGE_PREP_T_3_FIELDS: &[&str] = &[
    "mouse_number_t3",
    "total_injectable_volume",
    "syringe_number_t3",
    "antibiotic_resuspension_time",
    "time_first_injection_t3",
    "time_last_injection_t3",
    "antibiotic_used",
    "buprenorphine_dilution",
    "imipenem_cilastatin_dilution",
    "syringe_storage_condition",
    "protocol_deviations_t3",
    "syringe_prep_comments_t3",
    "buprenorphine_concentration",
    "antibiotic_timing_within_4_hours",
    "antibiotic_dissolution_confirmation",
    "antibiotic_preparation_confirmation",
];

const INDUCTION_FIELDS: &[&str] = &[
    "hqp_induction_data_entry_email",
    "hqp_induction_check_email",
    "hqp_syringe_prep_email",
    "hqp_wellness_check_t1_email",
    "hqp_injection_t0_email",
    "sepsis_induction_syringe_number",
    "syringe_preparation_date",
    "changed_to_conventional_housing",
    "mouse_anesthesia_method",
    "abdomen_massage_duration",
    "sepsis_induction_time",
    "injection_method",
    "plunger_retraction_observations",
    "anesthesia_injection_issues",
    "injections_staggered",
    "staggered_injection_interval",
    "injection_needle_color",
    "post_injection_cage_placement",
    "cage_warm_maintenance",
    "induction_protocol_deviations",
    "induction_comments",
];

const TREATMENT_INJECTION_FIELDS: &[&str] = &[
    "hqp_treatment_injection_data_entry_email",
    "hqp_treatment_injection_check_email",
    "hqp_treatment_syringe_prep_email",
    "treatment_syringe_number",
    "hqp_injected_treatment_email",
    "treatment_injection_time",
    "treatment_injection_administration",
    "treatment_route_administration",
    "treatment_injection_done_correctly",
    "treatment_injection_issues",
    "treatment_syringe_type",
    "treatment_protocol_deviations",
    "treatment_comments",
];

const EPOC_FIELDS: &[&str] = &[
    "epoc_card_expiry_date",
    "epoc_card_lot_number",
    "epoc_machine_backdated",
    "hqp_epoc_sample_injection_email",
    "epoc_sample_injection_time",
    "hqp_epoc_check_email",
    "hqp_epoc_data_entry_email",
    "hqp_epoc_verification_email",
    "epoc_run_status",
    "epoc_ph",
    "epoc_pco2",
    "epoc_po2",
    "epoc_chco3",
    "epoc_be_ecf",
    "epoc_be_b",
    "epoc_cso2",
    "epoc_na",
    "epoc_k",
    "epoc_ca",
    "epoc_cl",
    "epoc_hct",
    "epoc_chgb",
    "epoc_glu",
    "epoc_lac",
    "epoc_bun",
    "epoc_urea",
    "epoc_crea",
    "epoc_picture_upload_confirmation",
    "epoc_data_entry_confirmation",
    "epoc_protocol_deviations",
    "epoc_comments",
];

const BIOBANKING_FIELDS: &[&str] = &[
    "hqp_biobanking_data_entry_email",
    "hqp_biobanking_check_email",
    "hqp_tissue_sectioning_email",
    "biobanking_isoflurane_induction_time",
    "biobanking_isoflurane_percentage_induction",
    "biobanking_isoflurane_percentage_nose_cone",
    "biobanking_anesthesia_check_method",
    "mouse_cleaned_with_ethanol",
    "carotid_blood_collection_time",
    "hqp_carotid_blood_collection_email",
    "blood_collection_tube_type",
    "blood_collected_volume",
    "blood_collection_difficulties",
    "blood_collection_inverted",
    "blood_sample_storage",
    "epoc_analysis_outcome",
    "plf_pbs_injection_volume",
    "plf_injection_needle_size",
    "plf_massaged",
    "plf_collected_volume",
    "plf_sample_storage_temperature",
    "plf_sample_appearance",
    "plf_picture_uploaded",
    "plf_complications",
    "plf_complication_details",
    "freezing_agent",
    "brain_dissection",
    "hqp_brain_dissection_email",
    "lung_dissection",
    "hqp_lung_dissection_email",
    "heart_dissection",
    "hqp_heart_dissection_email",
    "liver_dissection",
    "hqp_liver_dissection_email",
    "spleen_dissection",
    "hqp_spleen_dissection_email",
    "kidney_dissection",
    "kidney_decapsulated",
    "hqp_kidney_dissection_email",
    "muscle_dissection",
    "hqp_muscle_dissection_email",
    "cecal_contents_dissection",
    "hqp_cecal_contents_collection_email",
    "biobanking_completed_organs",
    "dissection_complications_organs",
    "dissection_complications_explanation",
    "centrifuge_type",
    "blood_centrifugation_conditions",
    "eve_biomarker_analysis_samples",
    "eve_technologies_aliquot_volume",
    "eve_technology_sample_id",
    "custom_aliquot_volumes",
    "plf_aliquots_before_centrifugation",
    "number_of_plf_aliquots",
    "plf_centrifugation_conditions",
    "plf_supernatant_aliquots",
    "number_of_aliquots",
    "rnalater_transfer_to_80",
    "snap_freeze_storage_location",
    "falcon_tube_temp",
    "falcon_tube_shaken",
    "formalin_fixation_time",
    "formalin_fixation_exact_time",
    "pbs_wash_after_formalin",
    "long_term_storage_options",
    "sample_storage_temperature",
    "protocol_deviations_biobanking",
    "biobanking_comments",
];

const WBC_COUNT_FIELDS: &[&str] = &[
    "hqp_data_entry_wbc_email",
    "hqp_wbc_table_email",
    "wbc_count_conducted",
    "reason_not_counted",
    "wbc_count_time",
    "wbc_dye_used",
    "blood_sample_quality",
    "npsp_sop_followed",
    "made_changes_sop",
    "not_sure",
    "wbc_count_method",
    "wbc_count_corner1",
    "wbc_count_corner2",
    "wbc_count_corner3",
    "wbc_count_corner4",
    "wbc_total_cells",
    "wbc_cell_concentration",
    "wbc_protocol_deviations",
    "wbc_comments",
];

const BACTERIAL_CULTURE_INITIAL_FIELDS: &[&str] = &[
    "hqp_culture_data_entry_email",
    "hqp_culture_check_email",
    "hqp_biobanking_placing_samples",
    "blood_agar_plate_type",
    "dilution_preparation_location",
    "blood_plf_dilution_agent",
    "incubator_type",
    "blood_agar_plate_placement_time",
    "incubator_temperature",
];

const BACTERIAL_COUNT_24HR_FIELDS: &[&str] = &[
    "blood_dilution_counts",
    "plf_dilution_counts",
    "highest_blood_dilution_tried",
    "highest_dilution_plf_tried",
    "whole_blood_cfu_ml",
    "plf_cfu_ml",
    "colony_count_date",
    "colony_count_time",
    "hqp_colony_count_email",
    "hqp_biobanking_placing_samples_24_hours",
    "plf_replate_needed",
    "replating_hqp",
    "plates_uploaded_to_sharepoint",
    "protocol_deviations_details",
    "bacterial_culture_comments",
];

const ALLOCATION_FIELDS: &[&str] = &["allocation_list"];

impl FormKind {
    pub const ALL: [FormKind; 12] = [
        FormKind::Intake,
        FormKind::BodyweightTemp,
        FormKind::SyringePrepTMinus1,
        FormKind::SyringePrepT3,
        FormKind::Induction,
        FormKind::TreatmentInjection,
        FormKind::Epoc,
        FormKind::Biobanking,
        FormKind::WbcCount,
        FormKind::BacterialCultureInitial,
        FormKind::BacterialCount24hr,
        FormKind::Allocation,
    ];

    /// URL/storage slug.
    pub fn slug(self) -> &'static str {
        match self {
            FormKind::Intake => "intake",
            FormKind::BodyweightTemp => "bodyweight-temp",
            FormKind::SyringePrepTMinus1 => "syringe-prep-t-minus-1",
            FormKind::SyringePrepT3 => "syringe-prep-t-3",
            FormKind::Induction => "induction",
            FormKind::TreatmentInjection => "treatment-injection",
            FormKind::Epoc => "epoc",
            FormKind::Biobanking => "biobanking",
            FormKind::WbcCount => "wbc-count",
            FormKind::BacterialCultureInitial => "bacterial-culture-initial",
            FormKind::BacterialCount24hr => "bacterial-count-24hr",
            FormKind::Allocation => "allocation",
        }
    }

    /// Fields this form may write.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            FormKind::Intake => INTAKE_FIELDS,
            FormKind::BodyweightTemp => BODYWEIGHT_TEMP_FIELDS,
            FormKind::SyringePrepTMinus1 => SYRINGE_PREP_T_MINUS_1_FIELDS,
            FormKind::SyringePrepT3 => SYRINGE_PREP_T_3_FIELDS,
            FormKind::Induction => INDUCTION_FIELDS,
            FormKind::TreatmentInjection => TREATMENT_INJECTION_FIELDS,
            FormKind::Epoc => EPOC_FIELDS,
            FormKind::Biobanking => BIOBANKING_FIELDS,
            FormKind::WbcCount => WBC_COUNT_FIELDS,
            FormKind::BacterialCultureInitial => BACTERIAL_CULTURE_INITIAL_FIELDS,
            FormKind::BacterialCount24hr => BACTERIAL_COUNT_24HR_FIELDS,
            FormKind::Allocation => ALLOCATION_FIELDS,
        }
    }

    pub fn allows(self, field: &str) -> bool {
        self.fields().contains(&field)
    }

    /// Reject empty submissions and any key outside the allow-list.
    pub fn validate_fields(self, fields: &Map<String, Value>) -> Result<(), String> {
        if fields.is_empty() {
            return Err(format!("no fields submitted for form '{}'", self));
        }
        let mut rejected: Vec<&str> = fields
            .keys()
            .map(String::as_str)
            .filter(|key| !self.allows(key))
            .collect();
        if !rejected.is_empty() {
            rejected.sort_unstable();
            return Err(format!(
                "field(s) not allowed on form '{}': {}",
                self,
                rejected.join(", ")
            ));
        }

        if self == FormKind::Intake {
            if let Some(value) = fields.get(SEX_FIELD) {
                if sex_correction(value).is_none() {
                    return Err(format!("{} must be 'male' or 'female', got {}", SEX_FIELD, value));
                }
            }
        }
        Ok(())
    }
}

/// Parse a submitted `sex_of_mouse` value (case-insensitive).
pub fn sex_correction(value: &Value) -> Option<Sex> {
    value
        .as_str()
        .and_then(|s| Sex::parse(&s.trim().to_ascii_lowercase()))
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for FormKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.slug() == s)
            .ok_or_else(|| format!("unknown form '{}'", s))
    }
}

/// One subject's submission for a form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    pub subject_id: String,
    pub fields: Map<String, Value>,
}
