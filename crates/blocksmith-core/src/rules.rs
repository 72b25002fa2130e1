/// SysML block diagram rules shared by generation prompts and MCP instructions.
pub const RULES: &str = "\
1. Allowed element types are \"block\", \"sensor\" and \"processor\". Anything that is not clearly \
a sensor or a processor is a \"block\". Unknown types are rewritten to \"block\".\n\
2. Every element has an ID that is unique across the whole JSON document, including the IDs of \
nodes inside internal diagrams.\n\
3. Relationships are directed. \"source_id\" is the element that provides data, power or control; \
\"target_id\" is the element that consumes it. Relationships whose endpoints are not elements of the \
same diagram are discarded.\n\
4. Only connect elements that the description relates. Do not add return or acknowledgement edges.\n\
5. Keep descriptions concise: one sentence on what the element does in this system.\n\
6. Never emit position data. Layout is computed after generation: consumers are drawn at the top, \
the elements that feed them below.\n\
7. Properties are flat key/value pairs with units in the value (e.g. \"weight\": \"5kg\").\n\
8. Follow the structure of any example diagrams you are shown without copying their content.";

/// Extra rules for block definition diagrams with nested internal block diagrams.
pub const IBD_RULES: &str = "\
1. Only elements of type \"block\" or \"processor\" may carry an \"internal_diagram\", and only when \
the description implies internal structure.\n\
2. An \"internal_diagram\" has its own \"nodes\" and \"edges\". Nodes use type \"ibd_block\"; edges use \
\"id\", \"source\", \"target\" and \"label\".\n\
3. An internal diagram contains at least two nodes, one per sub-component the description names \
(e.g. \"flight controller containing CPU and memory\" yields a CPU node and a memory node).\n\
4. Internal nodes are never isolated: every internal diagram has at least two edges, each with a \
descriptive label such as \"Data Bus\", \"Control Signals\" or \"Power Supply\".";
