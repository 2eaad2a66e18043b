//! Care recommendations derived from the predicted label and its confidence.

/// Predictions below this confidence get the low-confidence advisory.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;

pub const LOW_CONFIDENCE_ADVICE: &str =
    "置信度较低，建议重新拍摄清晰叶片图片或咨询专业农技人员";
pub const HEALTHY_ADVICE: &str = "叶片健康状况良好，建议继续保持当前管理措施";
pub const GENERIC_TREATMENT_ADVICE: &str =
    "建议及时采取防治措施，可咨询当地农技部门获取具体防治方案";

/// Disease-name substring to treatment advice. Evaluated top to bottom; the
/// first key contained in the label wins.
pub const TREATMENTS: &[(&str, &str)] = &[
    ("白粉病", "建议使用三唑酮或硫磺粉进行防治，注意通风透光"),
    ("锈病", "建议使用粉锈宁或代森锰锌进行防治，及时清除病叶"),
    ("霜霉病", "建议使用甲霜灵或代森锰锌，注意控制田间湿度"),
    ("叶斑病", "建议使用多菌灵或百菌清，及时清除病残体"),
    ("炭疽病", "建议使用咪鲜胺或苯醚甲环唑，加强肥水管理"),
    ("病毒病", "建议防治传毒媒介，使用宁南霉素等抗病毒剂"),
    ("缺素症", "建议进行土壤检测，补充相应营养元素"),
];

pub fn is_healthy(label: &str) -> bool {
    label.contains("健康") || label.to_lowercase().contains("healthy")
}

pub fn recommend(label: &str, confidence: f64) -> &'static str {
    if confidence < LOW_CONFIDENCE_THRESHOLD {
        return LOW_CONFIDENCE_ADVICE;
    }
    if is_healthy(label) {
        return HEALTHY_ADVICE;
    }
    TREATMENTS
        .iter()
        .find(|(key, _)| label.contains(key))
        .map(|(_, advice)| *advice)
        .unwrap_or(GENERIC_TREATMENT_ADVICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn treatment(key: &str) -> &'static str {
        TREATMENTS.iter().find(|(k, _)| *k == key).unwrap().1
    }

    #[test]
    fn healthy_matches_either_convention() {
        assert!(is_healthy("健康"));
        assert!(is_healthy("番茄_健康叶片"));
        assert!(is_healthy("Tomato___healthy"));
        assert!(is_healthy("Apple HEALTHY"));
        assert!(!is_healthy("白粉病"));
        assert!(!is_healthy("Tomato___Late_blight"));
    }

    #[test]
    fn low_confidence_overrides_label() {
        assert_eq!(recommend("白粉病", 0.59), LOW_CONFIDENCE_ADVICE);
        assert_eq!(recommend("健康", 0.1), LOW_CONFIDENCE_ADVICE);
        assert_eq!(recommend("unknown", 0.0), LOW_CONFIDENCE_ADVICE);
    }

    #[test]
    fn threshold_is_inclusive_for_confident_predictions() {
        assert_eq!(recommend("白粉病", 0.6), treatment("白粉病"));
    }

    #[test]
    fn healthy_label_gets_maintain_care() {
        assert_eq!(recommend("健康", 0.95), HEALTHY_ADVICE);
        assert_eq!(recommend("Corn_healthy", 0.61), HEALTHY_ADVICE);
    }

    #[test]
    fn treatment_lookup_uses_substring() {
        assert_eq!(recommend("小麦锈病", 0.9), treatment("锈病"));
        assert_eq!(recommend("黄瓜霜霉病", 0.9), treatment("霜霉病"));
        assert_eq!(recommend("缺素症_缺氮", 0.8), treatment("缺素症"));
    }

    #[test]
    fn earliest_declared_key_wins() {
        // contains both 白粉病 and 锈病; 白粉病 is declared first
        assert_eq!(recommend("锈病合并白粉病", 0.9), treatment("白粉病"));
        // contains both 叶斑病 and 病毒病
        assert_eq!(recommend("叶斑病毒病", 0.9), treatment("叶斑病"));
    }

    #[test]
    fn unknown_disease_gets_generic_advice() {
        assert_eq!(recommend("Tomato___Late_blight", 0.99), GENERIC_TREATMENT_ADVICE);
    }
}
