use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex shader. Must match the pipeline vertex layout:
    //   binding 0, location 0: R32G32B32_SFLOAT (position)
    //   binding 0, location 1: R32G32B32_SFLOAT (normal)
    //   binding 0, location 2: R32G32B32_SFLOAT (color)
    //   binding 0, location 3: R32G32_SFLOAT    (uv)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inNormal;
layout(location = 2) in vec3 inColor;
layout(location = 3) in vec2 inUv;

layout(set = 0, binding = 0) uniform Camera {
    mat4 model;
    mat4 view;
    mat4 proj;
} cam;

layout(location = 0) out vec3 vWorldPos;
layout(location = 1) out vec3 vNormal;
layout(location = 2) out vec3 vColor;
layout(location = 3) out vec2 vUv;

void main() {
    vec4 world = cam.model * vec4(inPos, 1.0);
    vWorldPos = world.xyz;
    vNormal = mat3(transpose(inverse(cam.model))) * inNormal;
    vColor = inColor;
    vUv = inUv;
    gl_Position = cam.proj * cam.view * world;
}
"#;

    // Fragment shader: diffuse texture * vertex tint, one point light + ambient.
    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vWorldPos;
layout(location = 1) in vec3 vNormal;
layout(location = 2) in vec3 vColor;
layout(location = 3) in vec2 vUv;

layout(set = 0, binding = 1) uniform sampler2D diffuse;
layout(set = 0, binding = 2) uniform Light {
    vec4 position;
    vec4 color;
} light;

layout(location = 0) out vec4 outColor;

void main() {
    vec3 n = normalize(vNormal);
    vec3 l = normalize(light.position.xyz - vWorldPos);
    float diff = max(dot(n, l), 0.0);
    vec3 albedo = texture(diffuse, vUv).rgb * vColor;
    vec3 lit = albedo * (0.15 + diff * light.color.rgb);
    outColor = vec4(lit, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "main.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "main.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("main.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("main.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
