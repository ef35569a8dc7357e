use anyhow::Result;
use serde::Deserialize;

use crate::browser::Page;
use crate::types::{ButtonCandidate, FieldDescriptor, PageSnapshot, TEXT_SAMPLE_MAX_CHARS};

/// JavaScript injected into the page to inventory form controls and
/// button-like elements. NON-DESTRUCTIVE apart from stamping `data-aaid`
/// attributes, which give every control a stable identifier derived from
/// id/name/aria-label so it can be re-located after a re-render.
///
/// Returns a JSON string:
///   { fields: [...], buttons: [...], text: "visible text sample" }
pub const SCAN_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','TEMPLATE']);
  const used = new Set();

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function slug(raw, fallback) {
    let base = (raw || fallback || '').toString().toLowerCase()
      .replace(/[^a-z0-9]+/g, '-').replace(/^-+|-+$/g, '').slice(0, 48);
    if (!base) base = fallback;
    let id = base, n = 2;
    while (used.has(id)) { id = base + '-' + (n++); }
    used.add(id);
    return id;
  }

  function stamp(el, fallback) {
    const existing = el.getAttribute('data-aaid');
    if (existing) { used.add(existing); return existing; }
    const id = slug(el.id || el.name || el.getAttribute('aria-label'), fallback);
    el.setAttribute('data-aaid', id);
    return id;
  }

  function labelFor(el) {
    if (el.id) {
      const lab = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
      if (lab) return lab.textContent.trim();
    }
    const wrap = el.closest('label');
    if (wrap) return wrap.textContent.trim();
    const aria = el.getAttribute('aria-label');
    if (aria) return aria.trim();
    let prev = el.previousElementSibling;
    if (prev && prev.tagName === 'LABEL') return prev.textContent.trim();
    const parent = el.parentElement;
    if (parent) {
      const lab = parent.querySelector('label');
      if (lab) return lab.textContent.trim();
    }
    return el.placeholder || el.name || '';
  }

  function kindOf(el) {
    const tag = el.tagName.toLowerCase();
    if (tag === 'textarea') return 'text_area';
    if (tag === 'select') return 'dropdown';
    const t = (el.type || 'text').toLowerCase();
    switch (t) {
      case 'text': return 'text';
      case 'email': return 'email';
      case 'tel': return 'phone';
      case 'url': return 'url';
      case 'number': return 'number';
      case 'date': return 'date';
      case 'password': return 'password';
      case 'file': return 'file';
      case 'checkbox': return 'checkbox';
      default: return 'unknown';
    }
  }

  function requiredBits(el) {
    return {
      html_required: el.required === true || el.getAttribute('required') !== null,
      aria_required: el.getAttribute('aria-required') === 'true',
      data_required: el.getAttribute('data-required') === 'true'
    };
  }

  function describe(el, idx) {
    const bits = requiredBits(el);
    const f = {
      stable_id: stamp(el, 'field-' + idx),
      label: labelFor(el).slice(0, 160),
      kind: kindOf(el),
      value: (el.value || '').slice(0, 200),
      placeholder: el.placeholder || '',
      aria_text: (el.getAttribute('aria-label') || el.getAttribute('aria-describedby') || ''),
      html_required: bits.html_required,
      aria_required: bits.aria_required,
      data_required: bits.data_required,
      classes: [...el.classList].slice(0, 8),
      options: []
    };
    if (el.tagName.toLowerCase() === 'select') {
      f.options = [...el.options].slice(0, 40).map(o => ({
        label: o.text.trim().slice(0, 80),
        selector: ''
      }));
    }
    return f;
  }

  const fields = [];
  const groups = new Map();
  let idx = 0;

  for (const el of document.querySelectorAll('input, textarea, select')) {
    if (!isVisible(el)) continue;
    const t = (el.type || '').toLowerCase();
    if (t === 'hidden' || t === 'submit' || t === 'button' || t === 'image') continue;

    if ((t === 'radio' || t === 'checkbox') && el.name) {
      const key = t + ':' + el.name;
      if (!groups.has(key)) groups.set(key, []);
      groups.get(key).push(el);
      continue;
    }
    fields.push(describe(el, idx++));
  }

  for (const [key, els] of groups) {
    const t = key.split(':', 1)[0];
    if (t === 'checkbox' && els.length === 1) {
      fields.push(describe(els[0], idx++));
      continue;
    }
    const first = els[0];
    const bits = requiredBits(first);
    const groupId = slug(first.name, 'group-' + idx);
    let groupLabel = '';
    const fieldset = first.closest('fieldset');
    if (fieldset) {
      const legend = fieldset.querySelector('legend');
      if (legend) groupLabel = legend.textContent.trim();
    }
    if (!groupLabel) {
      const holder = first.closest('[role="group"], [role="radiogroup"]');
      if (holder) groupLabel = (holder.getAttribute('aria-label') || '').trim();
    }
    if (!groupLabel) groupLabel = first.name;
    fields.push({
      stable_id: groupId,
      label: groupLabel.slice(0, 160),
      kind: t === 'radio' ? 'radio_group' : 'checkbox_group',
      value: els.some(e => e.checked) ? 'checked' : '',
      placeholder: '',
      aria_text: '',
      html_required: bits.html_required,
      aria_required: bits.aria_required,
      data_required: bits.data_required,
      classes: [...first.classList].slice(0, 8),
      options: els.map((e, i) => ({
        label: labelFor(e).slice(0, 120),
        selector: '[data-aaid="' + stamp(e, groupId + '-opt-' + i) + '"]'
      }))
    });
    idx++;
  }

  const buttons = [];
  let bidx = 0;
  for (const el of document.querySelectorAll(
    'button, input[type="submit"], input[type="button"], a[role="button"], [role="button"]')) {
    if (!isVisible(el)) continue;
    const text = (el.innerText || el.value || el.getAttribute('aria-label') || '').trim();
    buttons.push({
      selector: '[data-aaid="' + stamp(el, 'btn-' + (bidx++)) + '"]',
      text: text.slice(0, 100),
      tag: el.tagName.toLowerCase(),
      classes: [...el.classList].slice(0, 8),
      disabled: el.disabled === true || el.getAttribute('aria-disabled') === 'true'
    });
  }

  const text = (document.body.innerText || '').replace(/\s+/g, ' ').slice(0, 6000);

  return JSON.stringify({ fields, buttons, text });
})()
"#;

#[derive(Debug, Deserialize)]
struct RawScan {
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
    #[serde(default)]
    buttons: Vec<ButtonCandidate>,
    #[serde(default)]
    text: String,
}

/// Run the scan and fold in URL and title. Always a fresh pass over the
/// live DOM; a cached scan misses dynamically injected controls.
pub async fn snapshot(page: &dyn Page) -> Result<PageSnapshot> {
    let raw: RawScan = serde_json::from_value(page.scan().await?)?;
    let mut text = raw.text;
    if text.len() > TEXT_SAMPLE_MAX_CHARS {
        text.truncate(TEXT_SAMPLE_MAX_CHARS);
    }
    Ok(PageSnapshot {
        url: page.current_url().await?,
        title: page.title().await?,
        text,
        fields: raw.fields,
        buttons: raw.buttons,
    })
}

pub async fn scan_fields(page: &dyn Page) -> Result<Vec<FieldDescriptor>> {
    let raw: RawScan = serde_json::from_value(page.scan().await?)?;
    Ok(raw.fields)
}

pub async fn scan_buttons(page: &dyn Page) -> Result<Vec<ButtonCandidate>> {
    let raw: RawScan = serde_json::from_value(page.scan().await?)?;
    Ok(raw.buttons.into_iter().filter(|b| !b.disabled).collect())
}
