fn main() {
    let mut features = vec!["txt".to_string(), "md".to_string()];
    if cfg!(feature = "pdf") {
        features.push("pdf".to_string());
    }
    if cfg!(feature = "docx") {
        features.push("docx".to_string());
    }
    println!("cargo:rustc-env=JURIS_FORMATS={}", features.join(", "));
}
