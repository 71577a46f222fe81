//! Built-in stage prompts
//!
//! Each stage has a `<stage>.system` and a `<stage>.user` template.

pub const CLEAN_SYSTEM: &str = "You are a meticulous contract analyst. You extract contract clauses verbatim and never invent text.";

pub const CLEAN_USER: &str = r#"Extract the contract clauses from the text segments below.
For every clause return its clause number (or a short heading when it has no number) as `reference`
and the clause wording, shortened to at most two sentences, as `text`.
Skip boilerplate such as page headers, signatures and addresses.
Return a JSON object of the form {"clauses": [{"reference": "...", "text": "..."}]}.

Contract file: {{source_file}}
{{#if currency}}Contract currency: {{currency}}
{{/if}}
Text segments:
{{#each segments}}
- {{this}}
{{/each}}
"#;

pub const COMPARE_SYSTEM: &str =
    "You are a contract compliance analyst who produces concise, structured reviews of invoices against contracts.";

pub const COMPARE_USER: &str = r#"Assess whether each invoice line is consistent with the contract.
A reconciliation has already matched the lines by key. For every key listed below state one of:
compliant, non_compliant, needs_review. Give a one-sentence rationale that cites the contract clause
when one applies, and a confidence between 0 and 1.
If information is missing to decide, use needs_review but still offer your best judgment.
Assess every key exactly once and do not add keys that are not listed.
Return a JSON object of the form
{"assessments": [{"key": "...", "status": "...", "rationale": "...", "confidence": 0.0}]}.

Keys:
{{#each keys}}
- {{this}}
{{/each}}

Reconciliation:
```yaml
{{reconciliation}}
```

Contract clauses:
{{#each clauses}}
- {{reference}}: {{text}}
{{else}}
- (none extracted)
{{/each}}
"#;

pub const RISK_BRIEF_SYSTEM: &str =
    "You are a meticulous contract compliance analyst who produces concise, structured reviews.";

pub const RISK_BRIEF_USER: &str = r#"Write a risk brief for the invoice below, reviewed against its contract.
Return markdown with exactly these sections, as level-two headings:
## Compliance Overview
## Line Item Review
## Risks & Follow-up

Under Line Item Review, render a markdown table with columns: Line, Invoice Details, Contract Alignment, Status, Confidence.
Status is one of Compliant, Non-compliant, Needs review. Reference the contract clauses that justify each decision.
Under Risks & Follow-up, list material deviations as bullet points, most significant first.

Contract: {{contract_file}}
Invoice: {{invoice_file}}

Comparison:
```yaml
{{comparison}}
```

Cleaned contract terms:
```yaml
{{contract}}
```
"#;

pub const TRANSLATE_SYSTEM: &str = "You are a professional translator for legal and commercial documents.";

pub const TRANSLATE_USER: &str = r#"Translate the markdown document below into the language with code `{{language}}`.
Keep the structure exactly: the same headings at the same levels, the same bullet points, the same table rows.
Translate prose and table cell text; keep numbers, currency codes, clause references and markdown syntax unchanged.
Return only the translated markdown.

{{document}}
"#;

/// `(name, template)` pairs registered by `PromptRenderer::new`
pub const BUILT_IN: [(&str, &str); 8] = [
    ("clean.system", CLEAN_SYSTEM),
    ("clean.user", CLEAN_USER),
    ("compare.system", COMPARE_SYSTEM),
    ("compare.user", COMPARE_USER),
    ("risk-brief.system", RISK_BRIEF_SYSTEM),
    ("risk-brief.user", RISK_BRIEF_USER),
    ("translate.system", TRANSLATE_SYSTEM),
    ("translate.user", TRANSLATE_USER),
];
