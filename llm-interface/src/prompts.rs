use agent_core::{Decision, Draft, FeedItem, Persona};

/// Number of feed items shown to the model when deciding.
pub const FEED_SUMMARY_ITEMS: usize = 10;

const MAX_ITEM_TEXT_CHARS: usize = 280;

pub fn identity(persona: &Persona) -> String {
    let mut prompt = format!(
        "You are {}, an AI agent participating on Moltbook, a social network for AI agents.\n\n{}",
        persona.name, persona.description
    );
    if !persona.topics.is_empty() {
        prompt.push_str(&format!(
            "\n\nTopics you know well: {}.",
            persona.topics.join(", ")
        ));
    }
    if !persona.style_hints.is_empty() {
        prompt.push_str("\n\nStyle:");
        for hint in &persona.style_hints {
            prompt.push_str(&format!("\n- {}", hint));
        }
    }
    prompt
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

pub fn feed_summary(feed: &[FeedItem]) -> String {
    if feed.is_empty() {
        return "The feed is empty.".to_string();
    }
    feed.iter()
        .take(FEED_SUMMARY_ITEMS)
        .map(|item| {
            format!(
                "- id={} [{}] \"{}\" by {} ({} upvotes, {} comments)",
                item.id, item.submolt, item.title, item.author, item.upvotes, item.comment_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decide(feed: &[FeedItem], context: Option<&str>) -> String {
    format!(
        "Here is the current Moltbook feed:\n{}\n\n\
         Instruction for this run: {}\n\n\
         Choose exactly one action:\n\
         - \"post\": write a new post, only if you have something worth sharing\n\
         - \"comment\": reply to one of the posts above\n\
         - \"upvote\": upvote one of the posts above\n\
         - \"none\": do nothing this time\n\n\
         Prefer thoughtful comments over new posts. For comment and upvote, target_post_id \
         must be one of the ids listed above.\n\n\
         Reply with JSON only:\n\
         {{\"action\": \"post|comment|upvote|none\", \"target_post_id\": \"<id or null>\", \"reason\": \"<one sentence>\"}}",
        feed_summary(feed),
        context.unwrap_or("regular heartbeat check")
    )
}

pub fn draft_post(context: Option<&str>, reason: Option<&str>) -> String {
    let topic = context.or(reason).unwrap_or("something you built or learned recently");
    format!(
        "Write a Moltbook post.\n\nWhat it should be about: {}\n\n\
         Open with a concrete hook, share one specific insight or story, and end with a \
         question that invites replies. Keep the title under 100 characters and the body \
         to one to three short paragraphs.\n\n\
         Answer in exactly this format:\n\
         Title: <title>\n\
         Submolt: <general, ai, coding, introductions, ...>\n\
         Content: <post body>",
        topic
    )
}

pub fn draft_comment(target: &FeedItem, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Write a comment replying to this Moltbook post.\n\n\
         Title: {}\nAuthor: {}\nSubmolt: {}\nContent: {}\n\n\
         Add something specific: an insight, a related experience or a follow-up question. \
         Do not just say \"great post\". Two to four sentences. Reply with the comment text only.",
        target.title,
        target.author,
        target.submolt,
        truncate(&target.text, MAX_ITEM_TEXT_CHARS * 4)
    );
    if let Some(context) = context {
        prompt.push_str(&format!("\n\nOperator note: {}", context));
    }
    prompt
}

pub const EVALUATOR_SYSTEM: &str = "You review drafts before an AI agent publishes them on \
     Moltbook. Be critical but fair. Reply with JSON only: {\"approved\": true|false, \
     \"score\": 0.0-1.0, \"issues\": [\"...\"], \"suggestions\": [\"...\"]}";

pub fn evaluate(draft: &Draft, persona: &Persona) -> String {
    let kind = if draft.title.is_some() { Decision::Post } else { Decision::Comment };
    let mut text = format!("Kind: {}\n", kind);
    if let Some(title) = &draft.title {
        text.push_str(&format!("Title: {}\nSubmolt: {}\n", title, draft.submolt_or_default()));
    }
    text.push_str(&format!("Content: {}", draft.content));

    format!(
        "Author persona: {} ({})\n\nDraft:\n{}\n\n\
         Check that it adds value, sounds like a real participant rather than a bot, \
         stays on the persona's topics and invites discussion. Any self-promotion must be \
         natural. Score it from 0 to 1.",
        persona.name,
        truncate(&persona.description, MAX_ITEM_TEXT_CHARS),
        text
    )
}
