//! Configuration classes for the architectures compiled into the engine.

use super::schema::{ConfigClass, FieldSpec, FieldType, NestedSpec};

/// Fields shared by every decoder-only transformer checkpoint.
fn decoder_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("hidden_size", FieldType::Integer),
        FieldSpec::required("num_attention_heads", FieldType::Integer),
        FieldSpec::required("num_hidden_layers", FieldType::Integer),
        FieldSpec::required("intermediate_size", FieldType::Integer),
        FieldSpec::required("vocab_size", FieldType::Integer),
        FieldSpec::optional("num_key_value_heads", FieldType::Integer),
        FieldSpec::optional("head_dim", FieldType::Integer),
        FieldSpec::optional("max_position_embeddings", FieldType::Integer).with_default(4096),
        FieldSpec::optional("hidden_act", FieldType::String).with_default("silu"),
        FieldSpec::optional("rms_norm_eps", FieldType::Float).with_default(1e-6),
        FieldSpec::optional("rope_theta", FieldType::Float).with_default(10000.0),
        FieldSpec::optional("rope_scaling", FieldType::Object),
        FieldSpec::optional("tie_word_embeddings", FieldType::Bool).with_default(false),
        FieldSpec::optional("attention_bias", FieldType::Bool).with_default(false),
        FieldSpec::optional("bos_token_id", FieldType::Any),
        FieldSpec::optional("eos_token_id", FieldType::Any),
        FieldSpec::optional("torch_dtype", FieldType::String),
    ]
}

fn moe_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("num_experts", FieldType::Integer),
        FieldSpec::required("num_experts_per_tok", FieldType::Integer),
        FieldSpec::optional("moe_intermediate_size", FieldType::Integer),
        FieldSpec::optional("norm_topk_prob", FieldType::Bool).with_default(true),
        FieldSpec::optional("decoder_sparse_step", FieldType::Integer).with_default(1),
        FieldSpec::optional("mlp_only_layers", FieldType::IntegerList),
    ]
}

pub fn llama() -> ConfigClass {
    ConfigClass::new("LlamaConfig")
        .with_model_type("llama")
        .fields(decoder_fields())
}

pub fn mistral() -> ConfigClass {
    ConfigClass::new("MistralConfig")
        .with_model_type("mistral")
        .fields(decoder_fields())
        .field(FieldSpec::optional("sliding_window", FieldType::Integer))
}

pub fn qwen3() -> ConfigClass {
    ConfigClass::new("Qwen3Config")
        .with_model_type("qwen3")
        .fields(decoder_fields())
        .field(FieldSpec::optional("sliding_window", FieldType::Integer))
        .field(FieldSpec::optional("use_sliding_window", FieldType::Bool).with_default(false))
        .field(FieldSpec::optional("max_window_layers", FieldType::Integer))
}

/// Single-layer Eagle draft head trained against a Llama target.
pub fn eagle_llama() -> ConfigClass {
    ConfigClass::new("EagleConfig").fields(decoder_fields())
}

/// Eagle-3 draft head; consumes concatenated multi-layer target states.
pub fn eagle3() -> ConfigClass {
    ConfigClass::new("Eagle3Config")
        .fields(decoder_fields())
        .field(FieldSpec::optional("draft_vocab_size", FieldType::Integer))
        .field(FieldSpec::optional("target_hidden_size", FieldType::Integer))
}

fn qwen2_vl_vision() -> ConfigClass {
    ConfigClass::new("Qwen2VLVisionConfig")
        .field(FieldSpec::required("depth", FieldType::Integer))
        .field(FieldSpec::required("embed_dim", FieldType::Integer))
        .field(FieldSpec::required("num_heads", FieldType::Integer))
        .field(FieldSpec::optional("hidden_size", FieldType::Integer))
        .field(FieldSpec::optional("mlp_ratio", FieldType::Float).with_default(4.0))
        .field(FieldSpec::optional("in_chans", FieldType::Integer).with_default(3))
        .field(FieldSpec::optional("patch_size", FieldType::Integer).with_default(14))
        .field(FieldSpec::optional("spatial_merge_size", FieldType::Integer).with_default(2))
        .field(FieldSpec::optional("temporal_patch_size", FieldType::Integer).with_default(2))
}

/// Qwen2-VL keeps the language-model fields at the top level of its
/// checkpoint; they are split into a `text_config` sub-config here.
pub fn qwen2_vl() -> ConfigClass {
    let text = ConfigClass::new("Qwen2VLTextConfig").fields(decoder_fields());
    ConfigClass::new("Qwen2VLConfig")
        .with_model_type("qwen2_vl")
        .field(FieldSpec::optional("image_token_id", FieldType::Integer))
        .field(FieldSpec::optional("video_token_id", FieldType::Integer))
        .field(FieldSpec::optional("vision_start_token_id", FieldType::Integer))
        .field(FieldSpec::optional("vision_end_token_id", FieldType::Integer))
        .nested(NestedSpec::flattened("text_config", text))
        .nested(NestedSpec::subtree("vision_config", qwen2_vl_vision()))
}

fn qwen3_vl_vision(name: &str) -> ConfigClass {
    ConfigClass::new(name)
        .field(FieldSpec::required("depth", FieldType::Integer))
        .field(FieldSpec::required("hidden_size", FieldType::Integer))
        .field(FieldSpec::required("num_heads", FieldType::Integer))
        .field(FieldSpec::required("patch_size", FieldType::Integer))
        .field(FieldSpec::optional("intermediate_size", FieldType::Integer))
        .field(FieldSpec::optional("out_hidden_size", FieldType::Integer))
        .field(FieldSpec::optional("hidden_act", FieldType::String).with_default("gelu_pytorch_tanh"))
        .field(FieldSpec::optional("in_channels", FieldType::Integer).with_default(3))
        .field(FieldSpec::optional("spatial_merge_size", FieldType::Integer).with_default(2))
        .field(FieldSpec::optional("temporal_patch_size", FieldType::Integer).with_default(2))
        .field(FieldSpec::optional("num_position_embeddings", FieldType::Integer))
        .field(FieldSpec::optional("deepstack_visual_indexes", FieldType::IntegerList))
}

/// Top-level fields of the Qwen3-VL family; text and vision live in
/// sub-configs.
fn qwen3_vl_family(name: &str, text: ConfigClass, vision: &str) -> ConfigClass {
    ConfigClass::new(name)
        .field(FieldSpec::optional("image_token_id", FieldType::Integer))
        .field(FieldSpec::optional("video_token_id", FieldType::Integer))
        .field(FieldSpec::optional("vision_start_token_id", FieldType::Integer))
        .field(FieldSpec::optional("vision_end_token_id", FieldType::Integer))
        .field(FieldSpec::optional("tie_word_embeddings", FieldType::Bool).with_default(false))
        .nested(NestedSpec::subtree("text_config", text))
        .nested(NestedSpec::subtree("vision_config", qwen3_vl_vision(vision)))
}

pub fn qwen3_vl() -> ConfigClass {
    let text = ConfigClass::new("Qwen3VLTextConfig").fields(decoder_fields());
    qwen3_vl_family("Qwen3VLConfig", text, "Qwen3VLVisionConfig")
        .with_model_type("qwen3_vl")
        .with_model_type("omega17_vl")
}

/// Also serves Omega17-VL-Exp checkpoints, which share its layout.
pub fn qwen3_vl_moe() -> ConfigClass {
    let text = ConfigClass::new("Qwen3VLMoeTextConfig")
        .fields(decoder_fields())
        .fields(moe_fields());
    qwen3_vl_family("Qwen3VLMoeConfig", text, "Qwen3VLMoeVisionConfig")
        .with_model_type("qwen3_vl_moe")
        .with_model_type("omega17_vl_exp")
}

/// Hybrid linear/full attention MoE decoder.
pub fn qwen3_next() -> ConfigClass {
    ConfigClass::new("Qwen3NextConfig")
        .with_model_type("qwen3_next")
        .with_model_type("omega17_vl_exp_text")
        .fields(decoder_fields())
        .fields(moe_fields())
        .field(FieldSpec::optional("shared_expert_intermediate_size", FieldType::Integer))
        .field(FieldSpec::optional("full_attention_interval", FieldType::Integer).with_default(4))
        .field(FieldSpec::optional("linear_num_key_heads", FieldType::Integer))
        .field(FieldSpec::optional("linear_num_value_heads", FieldType::Integer))
        .field(FieldSpec::optional("linear_key_head_dim", FieldType::Integer))
        .field(FieldSpec::optional("linear_value_head_dim", FieldType::Integer))
        .field(FieldSpec::optional("linear_conv_kernel_dim", FieldType::Integer))
}

pub fn bert() -> ConfigClass {
    ConfigClass::new("BertConfig")
        .with_model_type("bert")
        .field(FieldSpec::required("hidden_size", FieldType::Integer))
        .field(FieldSpec::required("num_attention_heads", FieldType::Integer))
        .field(FieldSpec::required("num_hidden_layers", FieldType::Integer))
        .field(FieldSpec::required("intermediate_size", FieldType::Integer))
        .field(FieldSpec::required("vocab_size", FieldType::Integer))
        .field(FieldSpec::optional("hidden_act", FieldType::String).with_default("gelu"))
        .field(FieldSpec::optional("layer_norm_eps", FieldType::Float).with_default(1e-12))
        .field(FieldSpec::optional("max_position_embeddings", FieldType::Integer).with_default(512))
        .field(FieldSpec::optional("type_vocab_size", FieldType::Integer).with_default(2))
}

pub fn whisper() -> ConfigClass {
    ConfigClass::new("WhisperConfig")
        .with_model_type("whisper")
        .field(FieldSpec::required("d_model", FieldType::Integer))
        .field(FieldSpec::required("encoder_layers", FieldType::Integer))
        .field(FieldSpec::required("decoder_layers", FieldType::Integer))
        .field(FieldSpec::required("encoder_attention_heads", FieldType::Integer))
        .field(FieldSpec::required("decoder_attention_heads", FieldType::Integer))
        .field(FieldSpec::required("vocab_size", FieldType::Integer))
        .field(FieldSpec::required("num_mel_bins", FieldType::Integer))
        .field(FieldSpec::optional("max_source_positions", FieldType::Integer).with_default(1500))
        .field(FieldSpec::optional("max_target_positions", FieldType::Integer).with_default(448))
}

/// Architecture id → configuration class for the built-in architectures.
/// Architectures reached only through a `model_type` alias have no row.
pub fn builtin_classes() -> Vec<(&'static str, ConfigClass)> {
    vec![
        ("LlamaForCausalLM", llama()),
        ("MistralForCausalLM", mistral()),
        ("Qwen3ForCausalLM", qwen3()),
        ("EagleLlamaForCausalLM", eagle_llama()),
        ("Eagle3LlamaForCausalLM", eagle3()),
        ("Qwen2VLForConditionalGeneration", qwen2_vl()),
        ("Qwen3NextForCausalLM", qwen3_next()),
        ("Qwen3VLForConditionalGeneration", qwen3_vl()),
        ("Qwen3VLMoeForConditionalGeneration", qwen3_vl_moe()),
        ("BertModel", bert()),
        ("WhisperForConditionalGeneration", whisper()),
    ]
}
