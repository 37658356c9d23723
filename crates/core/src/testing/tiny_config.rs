use serde_json::json;

use crate::config::CheckpointDescriptor;
use crate::configs::{ConfigClass, FieldSpec, FieldType, NestedSpec};

/// `config.json` of Qwen/Qwen3-0.6B.
pub const QWEN3_06B_CONFIG: &str = r#"{
    "architectures": ["Qwen3ForCausalLM"],
    "attention_bias": false,
    "attention_dropout": 0.0,
    "bos_token_id": 151643,
    "eos_token_id": 151645,
    "head_dim": 128,
    "hidden_act": "silu",
    "hidden_size": 1024,
    "initializer_range": 0.02,
    "intermediate_size": 3072,
    "max_position_embeddings": 40960,
    "max_window_layers": 28,
    "model_type": "qwen3",
    "num_attention_heads": 16,
    "num_hidden_layers": 28,
    "num_key_value_heads": 8,
    "rms_norm_eps": 1e-06,
    "rope_scaling": null,
    "rope_theta": 1000000,
    "sliding_window": null,
    "tie_word_embeddings": true,
    "torch_dtype": "bfloat16",
    "transformers_version": "4.51.0",
    "use_cache": true,
    "use_sliding_window": false,
    "vocab_size": 151936
}"#;

/// A Qwen3-VL-MoE style checkpoint: text and vision sub-configs nested under
/// `text_config` and `vision_config`.
pub const QWEN3_VL_MOE_CONFIG: &str = r#"{
    "architectures": ["Qwen3VLMoeForConditionalGeneration"],
    "eos_token_id": 151645,
    "image_token_id": 151655,
    "model_type": "qwen3_vl_moe",
    "pad_token_id": 151643,
    "text_config": {
        "attention_bias": false,
        "attention_dropout": 0.0,
        "bos_token_id": 151643,
        "decoder_sparse_step": 1,
        "dtype": "bfloat16",
        "eos_token_id": 151645,
        "head_dim": 128,
        "hidden_act": "silu",
        "hidden_size": 2048,
        "initializer_range": 0.02,
        "intermediate_size": 6144,
        "max_position_embeddings": 262144,
        "mlp_only_layers": [],
        "model_type": "qwen3_vl_moe_text",
        "moe_intermediate_size": 768,
        "norm_topk_prob": true,
        "num_attention_heads": 32,
        "num_experts": 128,
        "num_experts_per_tok": 8,
        "num_hidden_layers": 48,
        "num_key_value_heads": 4,
        "rms_norm_eps": 1e-06,
        "rope_scaling": {
            "mrope_interleaved": true,
            "mrope_section": [24, 20, 20],
            "rope_type": "default"
        },
        "rope_theta": 5000000,
        "router_aux_loss_coef": 0.001,
        "use_cache": false,
        "vocab_size": 151936
    },
    "tie_word_embeddings": false,
    "transformers_version": "4.57.1",
    "video_token_id": 151656,
    "vision_config": {
        "deepstack_visual_indexes": [8, 16, 24],
        "depth": 27,
        "dtype": "bfloat16",
        "hidden_act": "gelu_pytorch_tanh",
        "hidden_size": 1152,
        "in_channels": 3,
        "initializer_range": 0.02,
        "intermediate_size": 4304,
        "model_type": "qwen3_vl_moe",
        "num_heads": 16,
        "num_position_embeddings": 2304,
        "out_hidden_size": 2048,
        "patch_size": 16,
        "spatial_merge_size": 2,
        "temporal_patch_size": 2
    },
    "vision_end_token_id": 151653,
    "vision_start_token_id": 151652
}"#;

/// `config.json` of an Omega17-VL-Exp checkpoint. It reuses the Qwen3-VL-MoE
/// layout under its own `model_type` values.
pub const OMEGA17_VL_EXP_CONFIG: &str = r#"{
    "architectures": ["Omega17VLExpForConditionalGeneration"],
    "dtype": "bfloat16",
    "eos_token_id": 151645,
    "image_token_id": 151655,
    "model_type": "omega17_vl_exp",
    "pad_token_id": 151643,
    "text_config": {
        "attention_bias": false,
        "attention_dropout": 0.0,
        "bos_token_id": 151643,
        "decoder_sparse_step": 1,
        "dtype": "bfloat16",
        "eos_token_id": 151645,
        "head_dim": 128,
        "hidden_act": "silu",
        "hidden_size": 2048,
        "initializer_range": 0.02,
        "intermediate_size": 6144,
        "max_position_embeddings": 262144,
        "mlp_only_layers": [],
        "model_type": "omega17_vl_exp_text",
        "moe_intermediate_size": 768,
        "norm_topk_prob": true,
        "num_attention_heads": 32,
        "num_experts": 128,
        "num_experts_per_tok": 8,
        "num_hidden_layers": 48,
        "num_key_value_heads": 4,
        "rms_norm_eps": 1e-06,
        "rope_scaling": {
            "mrope_interleaved": true,
            "mrope_section": [24, 20, 20],
            "rope_type": "default"
        },
        "rope_theta": 5000000,
        "router_aux_loss_coef": 0.001,
        "use_cache": false,
        "vocab_size": 151936
    },
    "tie_word_embeddings": false,
    "transformers_version": "4.57.1",
    "video_token_id": 151656,
    "vision_config": {
        "deepstack_visual_indexes": [8, 16, 24],
        "depth": 27,
        "dtype": "bfloat16",
        "hidden_act": "gelu_pytorch_tanh",
        "hidden_size": 1152,
        "in_channels": 3,
        "initializer_range": 0.02,
        "intermediate_size": 4304,
        "model_type": "omega17_vl_exp",
        "num_heads": 16,
        "num_position_embeddings": 2304,
        "out_hidden_size": 2048,
        "patch_size": 16,
        "spatial_merge_size": 2,
        "temporal_patch_size": 2
    },
    "vision_end_token_id": 151653,
    "vision_start_token_id": 151652
}"#;

/// Minimal decoder class: 5 required fields, 2 with defaults.
pub fn tiny_text_class(name: &str) -> ConfigClass {
    ConfigClass::new(name)
        .field(FieldSpec::required("hidden_size", FieldType::Integer))
        .field(FieldSpec::required("num_attention_heads", FieldType::Integer))
        .field(FieldSpec::required("num_hidden_layers", FieldType::Integer))
        .field(FieldSpec::required("intermediate_size", FieldType::Integer))
        .field(FieldSpec::required("vocab_size", FieldType::Integer))
        .field(FieldSpec::optional("rms_norm_eps", FieldType::Float).with_default(1e-6))
        .field(FieldSpec::optional("hidden_act", FieldType::String).with_default("silu"))
}

/// Vision-language class: top-level text fields plus a required
/// `vision_config` sub-config.
pub fn tiny_vl_class(name: &str) -> ConfigClass {
    let vision = ConfigClass::new(format!("{name}Vision"))
        .field(FieldSpec::required("depth", FieldType::Integer))
        .field(FieldSpec::required("hidden_size", FieldType::Integer))
        .field(FieldSpec::optional("patch_size", FieldType::Integer).with_default(14));
    tiny_text_class(name)
        .field(FieldSpec::optional("image_token_id", FieldType::Integer))
        .nested(NestedSpec::subtree("vision_config", vision))
}

/// Tiny Llama-like checkpoint (4 layers, 64 hidden, 2 heads).
pub fn tiny_text_checkpoint(architecture_id: &str) -> CheckpointDescriptor {
    CheckpointDescriptor::new([architecture_id])
        .with_field("hidden_size", 64)
        .with_field("num_attention_heads", 2)
        .with_field("num_hidden_layers", 4)
        .with_field("intermediate_size", 128)
        .with_field("vocab_size", 256)
}

/// Tiny vision-language checkpoint matching [`tiny_vl_class`].
pub fn tiny_vl_checkpoint(architecture_id: &str) -> CheckpointDescriptor {
    tiny_text_checkpoint(architecture_id)
        .with_field("image_token_id", 250)
        .with_field(
            "vision_config",
            json!({
                "depth": 2,
                "hidden_size": 32,
                "patch_size": 14,
            }),
        )
}
