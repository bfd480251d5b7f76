pub const EXTRACTION_PROMPT: &str = r#"Analyze the provided image of an expert interview note/record.
Extract the content into the following structured fields:

1. title: The main headline or title of the document.
2. interviewTime: The interview date/time (e.g., "2025-09").
3. keywords: A list of key terms found in the "Keywords" or "关键词" section.
4. abstract: The text found in the "Abstract" or "摘要" section.
5. content: The main body text ("正文").

CRITICAL FORMATTING INSTRUCTIONS FOR 'content':
- You MUST strictly preserve all line breaks, paragraph separations, and formatting exactly as they appear in the original image.
- Do NOT merge paragraphs.
- Do NOT remove empty lines between sections.
- If the text in the image starts on a new line, your extracted text must start on a new line.

If a specific field is not explicitly labeled, infer it from the layout logic.
Do not include the label names (e.g., "摘要：") in the extracted value, just the content.

Return ONLY valid JSON with keys: title, interviewTime, keywords (array), abstract, content"#;

const ANSWER_RULES: &str = r#"You are a knowledgeable assistant for the "DocuMind" expert interview library.
Your goal is to answer the user's question based ONLY on the provided Context Documents below.

RULES:
1.  **Strictly Based on Context**: Do not use outside knowledge. If the answer is not in the documents, say "I cannot find the answer in the current knowledge base."
2.  **Citation is MANDATORY**: Whenever you use information from a specific document, you MUST append a citation immediately after the sentence or paragraph.
3.  **Citation Format**: The citation must be exactly in this format: [[doc_id]]
    - Do NOT use Markdown links like [Title](id).
    - ONLY use double brackets with the ID: [[id]].
4.  **Formatting**: Use Markdown to make your answer readable.
    - Use **bold** for key concepts.
    - Use lists (1. 2. 3. or - ) for multiple points.
    - Use headings (###) for sections if the answer is long.
5.  **Language**: Answer in the same language as the User's Question (likely Chinese).
6.  **Tone**: Professional, analytical, and concise."#;

/// 问答系统提示词：规则 + 文档上下文 + 可选的对话历史
pub fn answer_system_prompt(context: &str, history: &str) -> String {
    let mut prompt = format!("{}\n\nCONTEXT DOCUMENTS:\n{}\n", ANSWER_RULES, context);
    if !history.is_empty() {
        prompt.push_str("\nCHAT HISTORY:\n");
        prompt.push_str(history);
        prompt.push('\n');
    }
    prompt
}

/// Gemini 结构化输出的 JSON schema
pub fn extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "interviewTime": { "type": "string" },
            "keywords": { "type": "array", "items": { "type": "string" } },
            "abstract": { "type": "string" },
            "content": { "type": "string" }
        },
        "required": ["title", "content"]
    })
}
