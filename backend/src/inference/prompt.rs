/// Builds the diagnosis prompt for a photographed crop. The generator is
/// text-only, so the crop name is the only thing it is told about the plant;
/// the stored photo stays on the result record. The reply layout it asks for
/// is the one `parser::response_parser` reads back.
pub fn build_identification_prompt(crop_name: &str) -> String {
    let crop = crop_name.trim();
    format!(
        "You are an agricultural plant-health expert helping a farmer in the field.\n\
         The farmer has photographed a {crop} plant that looks unhealthy. You cannot \
         see the photo; the crop name is all you are given.\n\
         Based on the problems that most commonly affect {crop}, identify the most \
         likely pest or disease affecting this plant.\n\
         \n\
         Answer using exactly this layout:\n\
         <problem name on the first line>\n\
         Severity: <1, 2 or 3, where 1 = low, 2 = medium, 3 = high>\n\
         Description: <short description of the problem and its symptoms>\n\
         Actions:\n\
         1. <first recommended action>\n\
         2. <second recommended action>\n\
         Scientific name: <scientific name of the pest or pathogen, if known>\n\
         Type: <pest, fungal, bacterial, viral, nutrient or other, if known>\n\
         \n\
         Keep actions practical for a smallholder farmer and list the most urgent first."
    )
}
