//! Beacon payload encodings for page views, events and custom variables.

use percent_encoding::percent_decode_str;

use crate::error::{TrackerError, TrackerResult};
use crate::models::{CustomVariables, Event, Scope, TrackingContext};

/// Characters that delimit the payload encodings themselves.
const RESERVED: [char; 4] = ['*', '(', ')', '^'];

/// Replace each reserved delimiter with a space.
pub fn sanitize(text: &str) -> String {
    text.replace(RESERVED, " ")
}

/// Form-style URL decoding: `+` is a space, `%XX` escapes are decoded and
/// invalid UTF-8 is replaced.
pub fn url_decode(text: &str) -> String {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Page-specific beacon parameters: the document path and, when set, the
/// page title.
pub fn page_view_params(ctx: &TrackingContext) -> Vec<(&'static str, String)> {
    let mut params = vec![("utmp", url_decode(ctx.document_path()))];
    if !ctx.page_title().is_empty() {
        params.push(("utmdt", ctx.page_title().to_string()));
    }
    params
}

/// Event payload: `5(category*action[*label])[(value)]`.
///
/// Empty fields, and fields that are exactly `0`, are left out of the
/// `*`-joined list. The value is kept even when it is zero.
pub fn event_payload(event: &Event) -> TrackerResult<String> {
    let (Some(category), Some(action)) = (&event.category, &event.action) else {
        return Err(TrackerError::invalid(
            "an event needs both a category and an action",
        ));
    };

    let fields: Vec<String> = [Some(category), Some(action), event.label.as_ref()]
        .into_iter()
        .flatten()
        .map(|field| sanitize(field))
        // the collector's own client drops "0" as an empty field
        .filter(|field| !field.is_empty() && field != "0")
        .collect();
    if fields.is_empty() {
        return Err(TrackerError::invalid(
            "an event needs a non-empty category, action or label",
        ));
    }

    let mut payload = format!("5({})", fields.join("*"));
    if let Some(value) = event.value {
        payload.push_str(&format!("({value})"));
    }
    Ok(payload)
}

/// Event-specific beacon parameters.
pub fn event_params(event: &Event) -> TrackerResult<Vec<(&'static str, String)>> {
    let mut params = vec![("utmt", "event".to_string()), ("utme", event_payload(event)?)];
    if event.non_interaction {
        params.push(("utmni", "1".to_string()));
    }
    Ok(params)
}

/// Custom variable payload: `8(names)9(values)11(scopes)`, or `None` when
/// no variable is set.
///
/// Only visitor and session scoped variables contribute a scope token. A
/// token gets an `index!` prefix when the variable's index is beyond the
/// next position in the scope list.
pub fn custom_var_payload(vars: &CustomVariables) -> Option<String> {
    if vars.is_empty() {
        return None;
    }

    let mut names = Vec::with_capacity(vars.len());
    let mut values = Vec::with_capacity(vars.len());
    let mut scopes: Vec<String> = Vec::new();
    for var in vars.iter() {
        names.push(var.name.as_str());
        values.push(var.value.as_str());
        if matches!(var.scope, Scope::Visitor | Scope::Session) {
            let token = if usize::from(var.index) > scopes.len() + 1 {
                format!("{}!{}", var.index, var.scope.code())
            } else {
                var.scope.code().to_string()
            };
            scopes.push(token);
        }
    }

    Some(format!(
        "8({})9({})11({})",
        names.join("*"),
        values.join("*"),
        scopes.join("*")
    ))
}

/// Attach the custom variable payload to the extra parameters: appended to
/// an existing `utme`, otherwise added as a new `utme` parameter.
pub fn with_custom_vars(
    mut params: Vec<(&'static str, String)>,
    vars: &CustomVariables,
) -> Vec<(&'static str, String)> {
    let Some(payload) = custom_var_payload(vars) else {
        return params;
    };
    match params.iter_mut().find(|(key, _)| *key == "utme") {
        Some((_, utme)) => utme.push_str(&payload),
        None => params.push(("utme", payload)),
    }
    params
}
