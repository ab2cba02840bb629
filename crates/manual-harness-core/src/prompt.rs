//! Strict-grounding prompt construction.
//!
//! The system prompt embeds the retrieved context as numbered document
//! blocks and instructs the backend to answer only from them, replying
//! with the exact [`Language::unrelated_refusal`] sentence otherwise.

use crate::language::Language;
use crate::models::ContextItem;

/// Rendered context blocks plus how many items fit in the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContext {
    pub text: String,
    /// Number of leading items that made it into `text`.
    pub used: usize,
}

fn labels(language: Language) -> (&'static str, &'static str, &'static str) {
    match language {
        Language::Ja => ("ドキュメント", "ファイル名", "内容"),
        Language::En => ("Document", "File", "Content"),
        Language::Zh => ("文档", "文件名", "内容"),
        Language::Ko => ("문서", "파일명", "내용"),
    }
}

/// Render `items` as `[Document i]` blocks, stopping before the block
/// that would push the total past `max_chars` characters. The first
/// block is truncated rather than dropped so context is never empty
/// when items are.
pub fn render_context(items: &[ContextItem], language: Language, max_chars: usize) -> RenderedContext {
    let (doc, file, content) = labels(language);
    let mut text = String::new();
    let mut total = 0usize;
    let mut used = 0usize;

    for (i, item) in items.iter().enumerate() {
        let header = format!("[{} {}]\n{}: {}\n{}: ", doc, i + 1, file, item.filename, content);
        let sep = if i == 0 { 0 } else { 2 };
        let header_len = header.chars().count();
        let body_len = item.text.chars().count();

        if total + sep + header_len + body_len > max_chars {
            if i == 0 {
                let room = max_chars.saturating_sub(header_len);
                let body: String = item.text.chars().take(room).collect();
                text.push_str(&header);
                text.push_str(&body);
                used = 1;
            }
            break;
        }
        if i > 0 {
            text.push_str("\n\n");
        }
        text.push_str(&header);
        text.push_str(&item.text);
        total += sep + header_len + body_len;
        used += 1;
    }

    RenderedContext { text, used }
}

/// The strict RAG system prompt for `language` around rendered context.
pub fn system_prompt(language: Language, context: &str) -> String {
    let refusal = language.unrelated_refusal();
    match language {
        Language::Ja => format!(
            "あなたは厳密なRAGシステムです。以下のマニュアル情報のみを参照して回答してください。\n\n\
             {context}\n\n\
             【重要なルール】\n\
             1. 上記のマニュアル情報に関連する質問には、マニュアルの内容を引用して回答してください\n\
             2. マニュアルに関係ない質問には、必ず以下のように回答してください：\n   「{refusal}」\n\
             3. 一般知識や常識で回答してはいけません\n\
             4. マニュアルに明確に書かれていることだけを答えてください"
        ),
        Language::En => format!(
            "You are a STRICT RAG system. Only refer to the following manual information to answer questions.\n\n\
             {context}\n\n\
             IMPORTANT RULES:\n\
             1. For questions related to the manual above, quote and answer from the manual content\n\
             2. For questions unrelated to the manual, ALWAYS respond exactly:\n   \"{refusal}\"\n\
             3. Do NOT use general knowledge or common sense\n\
             4. ONLY answer what is explicitly written in the manual"
        ),
        Language::Zh => format!(
            "您是严格的RAG系统。仅参考以下手册信息回答问题。\n\n\
             {context}\n\n\
             【重要规则】\n\
             1. 对于与上述手册相关的问题，引用手册内容回答\n\
             2. 对于与手册无关的问题，必须回答：\n   \"{refusal}\"\n\
             3. 不要使用常识或一般知识\n\
             4. 仅回答手册中明确写明的内容"
        ),
        Language::Ko => format!(
            "당신은 엄격한 RAG 시스템입니다. 다음 매뉴얼 정보만 참조하여 답변하십시오.\n\n\
             {context}\n\n\
             【중요 규칙】\n\
             1. 위 매뉴얼 정보와 관련된 질문에는 매뉴얼 내용을 인용하여 답변하십시오\n\
             2. 매뉴얼과 관련 없는 질문에는 반드시 다음과 같이 답변하십시오:\n   \"{refusal}\"\n\
             3. 일반 지식이나 상식으로 답변하지 마십시오\n\
             4. 매뉴얼에 명확히 적힌 내용만 답변하십시오"
        ),
    }
}
