//! Accessibility rules evaluated inside the shared page.

use crate::capability::{Input, ScanCapability, ScanContext};
use crate::error::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sitescan_core::Capability;
use tracing::debug;

const RULES_SCRIPT: &str = r#"(() => {
    const text = el => (el.textContent || '').trim();
    const named = el => !!(text(el)
        || el.getAttribute('aria-label')
        || el.getAttribute('aria-labelledby')
        || el.getAttribute('title')
        || el.querySelector('img[alt]:not([alt=""])'));
    const count = (selector, failing) =>
        Array.from(document.querySelectorAll(selector)).filter(failing).length;
    const labelled = el =>
        (el.id && document.querySelector('label[for="' + CSS.escape(el.id) + '"]'))
        || el.closest('label')
        || el.getAttribute('aria-label')
        || el.getAttribute('aria-labelledby');
    const headingJumps = () => {
        let previous = 0;
        let jumps = 0;
        document.querySelectorAll('h1, h2, h3, h4, h5, h6').forEach(h => {
            const level = Number(h.tagName.substring(1));
            if (previous && level > previous + 1) jumps++;
            previous = level;
        });
        return jumps;
    };
    return [
        { id: 'image-alt', impact: 'critical', description: 'Images must have alternate text',
          nodes: count('img', img => !img.hasAttribute('alt') && img.getAttribute('role') !== 'presentation') },
        { id: 'label', impact: 'critical', description: 'Form elements must have labels',
          nodes: count('input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=image]), select, textarea', el => !labelled(el)) },
        { id: 'button-name', impact: 'critical', description: 'Buttons must have discernible text',
          nodes: count('button, [role=button]', b => !named(b) && !b.getAttribute('value')) },
        { id: 'html-has-lang', impact: 'serious', description: '<html> element must have a lang attribute',
          nodes: document.documentElement.getAttribute('lang') ? 0 : 1 },
        { id: 'document-title', impact: 'serious', description: 'Documents must have a <title> element',
          nodes: document.title.trim() ? 0 : 1 },
        { id: 'link-name', impact: 'serious', description: 'Links must have discernible text',
          nodes: count('a[href]', a => !named(a)) },
        { id: 'heading-order', impact: 'moderate', description: 'Heading levels should only increase by one',
          nodes: headingJumps() }
    ].filter(rule => rule.nodes > 0);
})()"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Minor,
    Moderate,
    Serious,
    Critical,
}

/// A failed rule and how many elements fail it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub impact: Impact,
    pub description: String,
    pub nodes: u32,
}

/// Result document: violations, most severe first.
pub fn report(mut violations: Vec<Violation>) -> Value {
    violations.retain(|v| v.nodes > 0);
    violations.sort_by(|a, b| b.impact.cmp(&a.impact).then_with(|| a.id.cmp(&b.id)));
    let affected: u32 = violations.iter().map(|v| v.nodes).sum();
    json!({
        "violations": violations,
        "affectedNodes": affected,
    })
}

/// Rule-based audit of the shared page.
#[derive(Debug, Default)]
pub struct AccessibilityCapability;

impl AccessibilityCapability {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScanCapability for AccessibilityCapability {
    fn capability(&self) -> Capability {
        Capability::Accessibility
    }

    fn inputs(&self) -> &'static [Input] {
        &[Input::Page]
    }

    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError> {
        let raw = ctx.page()?.evaluate(RULES_SCRIPT).await?;
        let violations: Vec<Violation> = serde_json::from_value(raw)
            .map_err(|e| CapabilityError::Failed(format!("unexpected rule output: {e}")))?;
        debug!(violations = violations.len(), "Accessibility rules evaluated");
        Ok(report(violations))
    }
}
