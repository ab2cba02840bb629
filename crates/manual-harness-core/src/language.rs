//! Supported answer languages, detection, and fixed user-facing messages.
//!
//! The fixed messages matter beyond display: the unrelated-question
//! refusal is also how a generated answer is recognised as a refusal.
//!
//! The keyword tables drive the answer safety checks: emergency keywords
//! route a question to a human before any retrieval, and blocked keywords
//! reject generated output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ja,
    En,
    Zh,
    Ko,
}

/// Characters common in Chinese but rare in Japanese text.
const ZH_MARKERS: &[char] = &[
    '你', '好', '谢', '请', '什', '么', '哪', '里', '怎', '吗', '呢', '的', '了', '着', '过', '时', '间',
];

fn is_kana(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309f}' | '\u{30a0}'..='\u{30ff}' | '\u{ff66}'..='\u{ff9f}')
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{ac00}'..='\u{d7af}' | '\u{1100}'..='\u{11ff}' | '\u{3130}'..='\u{318f}')
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Ja => "ja",
            Language::En => "en",
            Language::Zh => "zh",
            Language::Ko => "ko",
        }
    }

    /// Guess the language of `text` from its script.
    ///
    /// Hangul means Korean and any kana means Japanese. Han characters
    /// without kana are Chinese when a common Chinese-only character is
    /// present, otherwise Japanese. Everything else is English.
    pub fn detect(text: &str) -> Language {
        let mut han = false;
        for c in text.chars() {
            if is_hangul(c) {
                return Language::Ko;
            }
            if is_kana(c) {
                return Language::Ja;
            }
            han |= is_han(c);
        }
        if han {
            if text.chars().any(|c| ZH_MARKERS.contains(&c)) {
                Language::Zh
            } else {
                Language::Ja
            }
        } else {
            Language::En
        }
    }

    /// Refusal for a tenant with no ingested documents.
    pub fn no_manual(&self) -> &'static str {
        match self {
            Language::Ja => "申し訳ございません。現在、参照できるマニュアルがアップロードされていません。先にマニュアルファイルをアップロードしてください。",
            Language::En => "I apologize, but there are no manuals uploaded for reference. Please upload a manual file first.",
            Language::Zh => "很抱歉，目前没有上传可参考的手册。请先上传手册文件。",
            Language::Ko => "죄송합니다. 현재 참조할 수 있는 매뉴얼이 업로드되어 있지 않습니다. 먼저 매뉴얼 파일을 업로드해 주세요.",
        }
    }

    /// The exact sentence a grounded answer uses to decline an off-topic question.
    pub fn unrelated_refusal(&self) -> &'static str {
        match self {
            Language::Ja => "申し訳ございません。その質問はアップロードされたマニュアルの内容とは関係がありません。マニュアルに関するご質問をお願いいたします。",
            Language::En => "I apologize, but that question is not related to the uploaded manual content. Please ask questions about the manual.",
            Language::Zh => "很抱歉，该问题与上传的手册内容无关。请询问与手册相关的问题。",
            Language::Ko => "죄송합니다. 그 질문은 업로드된 매뉴얼 내용과 관련이 없습니다. 매뉴얼에 관한 질문을 해 주세요.",
        }
    }

    /// Fallback when the generation backend fails.
    pub fn system_error(&self) -> &'static str {
        match self {
            Language::Ja => "申し訳ございません。現在システムに問題が発生しています。しばらく経ってから再度お試しください。",
            Language::En => "We apologize for the inconvenience. The system is currently experiencing issues. Please try again later.",
            Language::Zh => "很抱歉给您带来不便。系统目前出现问题。请稍后再试。",
            Language::Ko => "불편을 드려 죄송합니다. 현재 시스템에 문제가 발생했습니다. 잠시 후 다시 시도해 주세요.",
        }
    }

    /// Fallback when the generation backend times out.
    pub fn generation_timeout(&self) -> &'static str {
        match self {
            Language::Ja => "申し訳ございません。AI回答の生成がタイムアウトしました。",
            Language::En => "I apologize. AI response generation timed out.",
            Language::Zh => "很抱歉，AI回答生成超时。",
            Language::Ko => "죄송합니다. AI 답변 생성이 타임아웃되었습니다.",
        }
    }

    /// Heading for an answer assembled from manual excerpts.
    pub fn found_heading(&self) -> &'static str {
        match self {
            Language::Ja => "以下の情報が見つかりました：",
            Language::En => "The following information was found:",
            Language::Zh => "找到以下信息：",
            Language::Ko => "다음 정보를 찾았습니다:",
        }
    }
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Ja, Language::En, Language::Zh, Language::Ko];

    /// Reply to a question that needs a human right away.
    pub fn escalation(&self) -> &'static str {
        match self {
            Language::Ja => "緊急のご用件のようです。すぐに担当者にお繋ぎいたします。",
            Language::En => "This appears to be urgent. We are connecting you to a staff member right away.",
            Language::Zh => "这似乎是紧急事项。我们将立即为您转接工作人员。",
            Language::Ko => "긴급한 용건인 것 같습니다. 바로 담당자에게 연결해 드리겠습니다.",
        }
    }

    pub fn emergency_keywords(&self) -> &'static [&'static str] {
        match self {
            Language::Ja => &[
                "緊急", "急ぎ", "至急", "大至急", "すぐに", "今すぐ", "事故", "怪我", "ケガ", "病気",
                "体調不良", "救急", "火事", "地震", "災害", "停電", "断水",
            ],
            Language::En => &[
                "emergency", "urgent", "urgently", "asap", "accident", "injury", "injured", "ambulance",
                "fire", "earthquake", "disaster", "blackout", "outage",
            ],
            Language::Zh => &["紧急", "急事", "马上", "立刻", "事故", "受伤", "生病", "救护车", "火灾", "地震", "灾害", "停电", "停水"],
            Language::Ko => &["긴급", "급해", "지금 당장", "사고", "부상", "다쳤", "아파", "구급차", "화재", "지진", "재난", "정전", "단수"],
        }
    }

    /// Words that must never appear in a generated answer.
    pub fn blocked_keywords(&self) -> &'static [&'static str] {
        match self {
            Language::Ja => &["死", "殺", "暴力", "違法"],
            Language::En => &["kill", "murder", "violence", "illegal"],
            Language::Zh => &["死", "杀", "暴力", "违法"],
            Language::Ko => &["죽", "살해", "폭력", "불법"],
        }
    }
}

/// True when `text` contains any of `keywords`. ASCII keywords match whole
/// words, case-insensitively; all others match as substrings.
pub fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|keyword| {
        if keyword.is_ascii() {
            lower
                .match_indices(keyword)
                .any(|(start, m)| word_boundary(&lower, start, start + m.len()))
        } else {
            lower.contains(keyword)
        }
    })
}

fn word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_alphanumeric()) && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Emergency keyword detection across every supported language, since a
/// guest may write in a language other than the one answers are given in.
pub fn is_emergency(question: &str) -> bool {
    Language::ALL
        .iter()
        .any(|lang| contains_keyword(question, lang.emergency_keywords()))
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" | "jp" | "japanese" => Ok(Language::Ja),
            "en" | "english" => Ok(Language::En),
            "zh" | "cn" | "chinese" => Ok(Language::Zh),
            "ko" | "kr" | "korean" => Ok(Language::Ko),
            other => Err(RagError::invalid(format!("unsupported language '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(Language::detect("What time is check-in?"), Language::En);
        assert_eq!(Language::detect("チェックインは何時ですか？"), Language::Ja);
        assert_eq!(Language::detect("駐車場"), Language::Ja);
        assert_eq!(Language::detect("入住时间是什么时候？"), Language::Zh);
        assert_eq!(Language::detect("체크인은 몇 시인가요?"), Language::Ko);
        assert_eq!(Language::detect(""), Language::En);
    }

    #[test]
    fn test_parse() {
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert_eq!("ko".parse::<Language>().unwrap(), Language::Ko);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_messages_distinct_per_language() {
        for lang in Language::ALL {
            assert_ne!(lang.no_manual(), lang.unrelated_refusal());
            assert_ne!(lang.system_error(), lang.generation_timeout());
        }
    }

    #[test]
    fn test_emergency_detection() {
        assert!(is_emergency("火事です！"));
        assert!(is_emergency("部屋で停電しています"));
        assert!(is_emergency("There's a FIRE in the lobby"));
        assert!(is_emergency("我受伤了"));
        assert!(is_emergency("사고가 났어요"));
        assert!(!is_emergency("チェックインは何時ですか？"));
        assert!(!is_emergency("What time is check-in?"));
    }

    #[test]
    fn test_ascii_keywords_match_whole_words() {
        assert!(!contains_keyword("Is there a fireplace?", &["fire"]));
        assert!(!contains_keyword("the skillful chef", &["kill"]));
        assert!(contains_keyword("fire!", &["fire"]));
        assert!(contains_keyword("Illegal parking", &["illegal"]));
    }

    #[test]
    fn test_cjk_keywords_match_substrings() {
        assert!(contains_keyword("暴力行為は禁止です", Language::Ja.blocked_keywords()));
        assert!(!contains_keyword("チェックインは15時からです。", Language::Ja.blocked_keywords()));
    }
}
