//! Prompt text for the generating stages.
//!
//! System prompts are fixed; user prompts embed the upstream document or
//! code. Both are scrubbed of banned tokens before they are sent.

pub const DEFAULT_FEATURE_FOCUS: &str = "the trading feature category of your choice";
pub const DEFAULT_ALPHA_FOCUS: &str = "the alpha category of your choice";

pub const IDEA_SYSTEM: &str = "\
You are a quantitative engineer specialized in feature engineering for trading.
Respond only with one valid YAML document: no markdown, no explanations, no code fences.

Required fields:
idea: <short feature name, lowercase with underscores>
family: <broad category such as volatility, momentum, microstructure>
dependencies: [<Python libraries required>]
description: >
  <what the feature measures and why it might be useful>
inputs: [<OHLCV columns actually used>]
parameters:
  <parameter_name>: <default value>
output:
  name: <output name>
  type: pd.Series
  description: <short explanation of the returned value>
mathematical_formula: >
  <computation in readable math notation>
implementation_hint: |
  <numbered pseudo-code steps, not Python>
";

pub fn idea_user(focus: &str) -> String {
    format!(
        "Propose one new, exploitable and logically coherent feature based on OHLCV data.\n\n\
         Focus your idea on {}.\n\n\
         Keep 'inputs' minimal: list only the columns the implementation hint actually uses. \
         For features that apply to any column, use a single generic input 'col'.",
        focus
    )
}

pub const CONCEPT_SYSTEM: &str = "\
You are a senior quantitative researcher in systematic trading. You receive YAML documents
describing statistical relationships between explanatory features and predictive targets.

Extract ONE economically meaningful alpha concept that another agent can later turn into a
formula. Justify it by who loses, which behavioral bias sustains the inefficiency and why it
persists. Do not propose formulas. Never reference target columns directly; use their ex-ante
equivalents.

Output strictly valid YAML in this format and nothing else:

alpha_concept:
  name: <short descriptive name>
  hypothesis: <economic or behavioral hypothesis>
  expected_role: <signal | filter | regime_indicator | risk | position_sizing>
  target_behavior: <trend | mean_reversion | volatility | ...>
  related_features: [<key features>]
  lbp:
    who_loses: <description>
    behavioral_bias: <description>
    persistence_reason: <description>
";

pub fn concept_user(focus: &str, documents: &str) -> String {
    format!(
        "Your current focus is {}.\n\nHere are the input documents:\n\n{}\n\n\
         Analyze them collectively and return one alpha_concept document.",
        focus, documents
    )
}

pub const FORMULA_SYSTEM: &str = "\
You are a quantitative researcher turning an alpha concept into a tradable formula.
Use only features named in the concept; feature windows are already encoded in column names.
Allowed transforms: sma, ema, std, zscore, rank, abs, clip, lag. No look-ahead.

Output strictly valid YAML in this format and nothing else:

alpha_formula:
  name: <name>
  formula: <expression over feature columns>
  conditioning: <boolean expression or null>
  used_features: [<feature columns>]
  parameters:
    <parameter_name>: <default value>
  rationale: <one or two sentences>
";

pub fn formula_user(concept: &str) -> String {
    format!("Here is the alpha concept:\n\n{}\n\nReturn one alpha_formula document.", concept)
}

pub const FEATURE_CODE_SYSTEM: &str = "\
You are a quantitative developer. Generate one deterministic, vectorized Python function that
implements a feature from OHLCV data.

1. Import only what the function uses.
2. The first argument is always `df: pd.DataFrame`, then `window_size: int` if needed, then only
   the column-name parameters actually used (`col`, `open_col`, `high_col`, `low_col`,
   `close_col`, `volume_col`).
3. Return a pd.Series. Use numpy/pandas vectorized operations, never loops.
4. Include a short NumPy-style docstring and brief technical inline comments.
5. Output only Python code: no examples, prints or markdown.
";

pub const ALPHA_CODE_SYSTEM: &str = "\
You are a quantitative developer. Output ONLY valid Python code: imports and exactly one function.

1. `df` is a feature store that already contains every referenced feature column. Do not
   recompute features; read df['<feature>'] and apply the transforms the formula requires.
2. Build a set `required` of the referenced columns and raise ValueError listing any missing.
3. Return exactly two pd.Series, (alpha, condition), typed as Tuple[pd.Series, pd.Series].
   Without conditioning, condition is a boolean Series of True aligned to df.index.
4. No look-ahead; leave NaNs from rolling windows as they are.
5. Apply transforms through small Series helpers defined only if used:
   sma, ema, std, zscore, rank, abs, clip, lag.
6. The signature is minimal: `df: pd.DataFrame` first, then only hyperparameters actually used.
7. A NumPy-style docstring is required.
";

pub fn code_user(spec: &str) -> String {
    format!(
        "Implement the following specification as a Python function:\n\n{}\n\n\
         Return only the Python code.",
        spec
    )
}

pub const REFINE_SYSTEM: &str = "\
You are a senior quantitative software engineer. Refactor the code WITHOUT changing its logic
and output ONLY valid Python code (imports and one function).

1. Keep the signature minimal: `df: pd.DataFrame` first, then only parameters that are used.
2. Remove unused imports, helpers and parameters.
3. Keep or add a NumPy-style docstring with Parameters and Returns sections.
4. Protect divisions with a small epsilon.
5. Do not add text outside the code.
";

pub fn refine_user(code: &str) -> String {
    format!(
        "Here is the code to clean and standardize:\n\n{}\n\nReturn only the cleaned Python code.",
        code
    )
}

pub const EXPLAIN_SYSTEM: &str = "\
You are a quantitative researcher and educator. Explain the following trading code to a human
reader in clear, intuitive Markdown using this structure:

- **Purpose:** one sentence on what it measures.
- **How it works:** the key computation steps in plain words.
- **Inputs & Parameters:** what each input means.
- **Use case:** when and why a trader might use it.
- **Interpretation:** how to read high and low values.

Output only Markdown text, no code fences.
";

pub fn explain_user(content: &str) -> String {
    format!(
        "Here is the code:\n\n{}\n\nWrite the explanation as described above.",
        content
    )
}

pub const REPORT_SYSTEM: &str = "\
You are a senior quantitative researcher preparing an internal report for a portfolio manager.
Turn the following alpha definition (YAML) into a clear, structured Markdown document:

# Overview
**Objective:** what market behavior the alpha exploits and the idea behind it.
**In one sentence:** how the signal makes money.

# Signal Logic
Bullet list of the building blocks, with formulas in inline code.

# Conditioning
When the signal is active and why.

# Expected Behavior
**Favorable regimes:** where it should work.
**Challenging regimes:** where it should degrade.

Be analytical and concise. Output only Markdown text, no code fences.
";

pub fn report_user(content: &str) -> String {
    format!(
        "Here is the alpha definition:\n\n{}\n\nWrite the report as described above.",
        content
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompts_embed_content() {
        assert!(idea_user("volume imbalance").contains("Focus your idea on volume imbalance."));
        assert!(code_user("idea: x").contains("\n\nidea: x\n\n"));
        assert!(refine_user("def f(): pass").contains("def f(): pass"));
        assert!(report_user("alpha_concept: {}").contains("alpha definition:\n\nalpha_concept: {}"));
    }
}
