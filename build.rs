use vergen::EmitBuilder;

fn main() {
    // 启动日志里会打印构建时间和提交号，生成失败时不影响编译
    if let Err(e) = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit()
    {
        println!("cargo:warning=无法生成构建信息: {}", e);
    }
}
