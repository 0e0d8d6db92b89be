//! Answer prompt assembly and safe fallback texts

use crate::llm::ChatMessage;
use crate::types::{ArticleRef, Context, RetrievedPassage};

pub const SYSTEM_PROMPT: &str = "Ты — юридический AI-ассистент по российскому законодательству. \
Отвечай на вопросы СТРОГО на основе предоставленных статей кодексов. \
Правила:\n\
1. Каждое утверждение подкрепляй ссылкой на конкретную статью: (ст. N Кодекса)\n\
2. Если в предоставленных статьях нет ответа — честно скажи об этом\n\
3. НЕ выдумывай статьи или нормы, которых нет в контексте\n\
4. Отвечай понятным языком, но с юридической точностью\n\
5. В конце ответа выведи список использованных источников\n\
6. Если вопрос не юридический — вежливо скажи, что специализируешься \
только на российском законодательстве";

pub const NO_RESULTS_MESSAGE: &str = "К сожалению, я не нашёл релевантных статей по вашему вопросу. \
Попробуйте переформулировать вопрос или уточнить, какой именно кодекс вас интересует.";

const NO_GROUNDING_INSTRUCTION: &str = "По этому вопросу в базе кодексов РФ не найдено ни одной подходящей статьи. \
Не называй номера статей и не ссылайся на нормы закона. \
Честно сообщи пользователю, что релевантные статьи не найдены, и предложи \
переформулировать вопрос или уточнить, какой кодекс его интересует.";

/// Numbered context blocks separated by `---`.
pub fn format_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "[{}] {} — Статья {}. {}\n(Релевантность: {:.2})\n{}\n",
                i + 1,
                p.code_name,
                p.article_number,
                p.article_title,
                p.score,
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// One line per passage: `- {code}, ст. {num}. {title}`.
pub fn sources_list(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| {
            let title = p.article_title.trim();
            if title.is_empty() {
                format!("- {}, ст. {}", p.code_name, p.article_number)
            } else {
                format!("- {}, ст. {}. {}", p.code_name, p.article_number, title)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn allowed_list(refs: &[ArticleRef]) -> String {
    refs.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
}

/// Messages for the answer model.
pub fn build_answer_messages(context: &Context, question: &str) -> Vec<ChatMessage> {
    let user = if context.is_empty() {
        format!("{}\n\n---\n\nВопрос пользователя: {}", NO_GROUNDING_INSTRUCTION, question)
    } else {
        format!(
            "Найденные статьи кодексов:\n\n{}\n\n---\n\n\
             Ссылаться можно только на эти статьи: {}\n\n\
             Вопрос пользователя: {}",
            format_context(context.passages()),
            allowed_list(&context.article_refs()),
            question
        )
    };
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Follow-up asking the model to drop citations that are not in the context.
pub fn correction_message(invalid: &[String], context: &Context) -> ChatMessage {
    let body = if context.is_empty() {
        format!(
            "В ответе есть ссылки на статьи ({}), хотя подходящих статей не найдено. \
             Перепиши ответ без номеров статей.",
            invalid.join(", ")
        )
    } else {
        format!(
            "В ответе есть ссылки на статьи, которых нет в найденном контексте: {}. \
             Перепиши ответ, ссылаясь только на: {}.",
            invalid.join(", "),
            allowed_list(&context.article_refs())
        )
    };
    ChatMessage::user(body)
}

/// Shown when the model keeps citing articles outside the context.
pub fn fallback_answer(context: &Context) -> String {
    if context.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }
    format!(
        "Не удалось сформировать ответ с достоверными ссылками на статьи. \
         По вашему вопросу найдены следующие статьи, с которыми стоит ознакомиться:\n{}",
        sources_list(context.passages())
    )
}
